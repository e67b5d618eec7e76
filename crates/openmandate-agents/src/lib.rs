//! OpenMandate Agents - the three parties of a purchase
//!
//! Deterministic reference actors over the bus and the protocol engine:
//! the shopper creates and signs mandates, the merchant quotes products and
//! proposes carts, the credentials provider issues tokens, challenges with
//! OTP, authorizes and captures. Each agent owns a signing identity and
//! never mutates a session except through the engine.

pub mod catalog;
pub mod directory;
pub mod merchant;
pub mod provider;
pub mod shopper;

pub use catalog::{Catalog, Product};
pub use directory::{PaymentMethod, ShippingAddress, UserDirectory, UserProfile};
pub use merchant::{FulfillmentOrder, InventoryReservation, MerchantAgent};
pub use provider::CredentialsProviderAgent;
pub use shopper::ShopperAgent;

use openmandate_bus::BusError;
use openmandate_crypto::CryptoError;
use openmandate_types::MandateError;
use thiserror::Error;

/// Errors that can occur in agent operations
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Mandate error: {0}")]
    Mandate(#[from] MandateError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Product not found: {sku}")]
    ProductNotFound { sku: String },

    #[error("Insufficient stock for {sku}: available {available}, requested {requested}")]
    InsufficientStock {
        sku: String,
        available: u32,
        requested: u32,
    },

    #[error("Unknown user: {user_id}")]
    UnknownUser { user_id: String },

    #[error("Unknown payment method {payment_method_id} for user {user_id}")]
    UnknownPaymentMethod {
        user_id: String,
        payment_method_id: String,
    },

    #[error("Unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage { expected: String, got: String },

    #[error("Cart rejected: {reason}")]
    CartRejected { reason: String },
}

pub type Result<T> = std::result::Result<T, AgentError>;
