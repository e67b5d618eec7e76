//! Identity types for OpenMandate
//!
//! Generated ids are strongly typed wrappers around UUIDs to prevent
//! accidental mixing of different id types. External identities (agents,
//! users, merchants, SKUs) are string-backed newtypes because their values
//! come from collaborators, not from this system.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

// Protocol identity types
define_id_type!(MandateId, "mandate", "Unique identifier for a mandate");
define_id_type!(SessionId, "session", "Unique identifier for a purchase session");
define_id_type!(MessageId, "msg", "Unique identifier for a transport envelope");
define_id_type!(RecordId, "record", "Unique identifier for an audit record");

// Payment identity types
define_id_type!(ChallengeId, "otp", "Unique identifier for an OTP challenge");
define_id_type!(TransactionId, "txn", "Unique identifier for a captured transaction");
define_id_type!(CaptureId, "cap", "Unique identifier for a capture");
define_id_type!(ReceiptId, "receipt", "Unique identifier for a transaction receipt");

// Merchant identity types
define_id_type!(ReservationId, "res", "Unique identifier for an inventory reservation");
define_id_type!(FulfillmentId, "fulfillment", "Unique identifier for a fulfillment order");

/// Macro to generate string-backed external identity types
macro_rules! define_name_type {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an externally-supplied identity string
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the identity as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the identity is empty (invalid everywhere it is used)
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

define_name_type!(AgentId, "Identity of a participating agent (shopper, merchant, credentials provider)");
define_name_type!(UserId, "Identity of the human user a shopper agent acts for");
define_name_type!(MerchantId, "Identity of a merchant");
define_name_type!(Sku, "Stock-keeping unit identifying a catalog product");
