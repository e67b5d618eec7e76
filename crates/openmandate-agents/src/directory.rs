//! Provider-side user directory
//!
//! Profiles, shipping addresses and payment methods the credentials
//! provider keeps on file. Seeded with the demo users.

use crate::{AgentError, Result};
use openmandate_types::UserId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A user known to the credentials provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub full_name: String,
    pub email: String,
    pub phone: String,
}

/// A shipping address on file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub address_id: String,
    pub recipient: String,
    pub address_line_1: String,
    pub address_line_2: Option<String>,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
    pub default: bool,
}

/// A payment method on file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub payment_method_id: String,
    pub kind: String,
    pub brand: String,
    pub last_four: String,
    pub default: bool,
    pub verified: bool,
}

struct UserRecord {
    profile: UserProfile,
    addresses: Vec<ShippingAddress>,
    payment_methods: Vec<PaymentMethod>,
}

/// Directory of users the provider can vouch for
#[derive(Default)]
pub struct UserDirectory {
    users: HashMap<UserId, UserRecord>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The demo users
    pub fn seeded() -> Self {
        let mut directory = Self::new();
        directory.insert(
            UserProfile {
                user_id: UserId::new("user_bugs_bunny"),
                full_name: "Bugs Bunny".to_string(),
                email: "bugsbunny@gmail.com".to_string(),
                phone: "+1-000-000-0000".to_string(),
            },
            vec![
                ShippingAddress {
                    address_id: "addr_001".to_string(),
                    recipient: "Bugs Bunny".to_string(),
                    address_line_1: "123 Main St".to_string(),
                    address_line_2: Some("Apt 4B".to_string()),
                    city: "Los Angeles".to_string(),
                    state: "CA".to_string(),
                    zip_code: "90001".to_string(),
                    country: "US".to_string(),
                    default: true,
                },
                ShippingAddress {
                    address_id: "addr_002".to_string(),
                    recipient: "Bugs Bunny".to_string(),
                    address_line_1: "456 Business Ave".to_string(),
                    address_line_2: Some("Suite 100".to_string()),
                    city: "Los Angeles".to_string(),
                    state: "CA".to_string(),
                    zip_code: "90002".to_string(),
                    country: "US".to_string(),
                    default: false,
                },
            ],
            vec![
                PaymentMethod {
                    payment_method_id: "pm_amex_4444".to_string(),
                    kind: "credit_card".to_string(),
                    brand: "american_express".to_string(),
                    last_four: "4444".to_string(),
                    default: false,
                    verified: true,
                },
                PaymentMethod {
                    payment_method_id: "pm_amex_8888".to_string(),
                    kind: "credit_card".to_string(),
                    brand: "american_express".to_string(),
                    last_four: "8888".to_string(),
                    default: true,
                    verified: true,
                },
                PaymentMethod {
                    payment_method_id: "pm_bank_001".to_string(),
                    kind: "bank_account".to_string(),
                    brand: "chase".to_string(),
                    last_four: "1234".to_string(),
                    default: false,
                    verified: true,
                },
            ],
        );
        directory.insert(
            UserProfile {
                user_id: UserId::new("user_123"),
                full_name: "Test User".to_string(),
                email: "user123@example.com".to_string(),
                phone: "+1-555-0123".to_string(),
            },
            vec![],
            vec![],
        );
        directory
    }

    /// Add or replace a user record
    pub fn insert(
        &mut self,
        profile: UserProfile,
        addresses: Vec<ShippingAddress>,
        payment_methods: Vec<PaymentMethod>,
    ) {
        self.users.insert(
            profile.user_id.clone(),
            UserRecord {
                profile,
                addresses,
                payment_methods,
            },
        );
    }

    pub fn profile(&self, user_id: &UserId) -> Result<&UserProfile> {
        self.record(user_id).map(|r| &r.profile)
    }

    pub fn addresses(&self, user_id: &UserId) -> Result<&[ShippingAddress]> {
        self.record(user_id).map(|r| r.addresses.as_slice())
    }

    pub fn default_address(&self, user_id: &UserId) -> Result<Option<&ShippingAddress>> {
        let record = self.record(user_id)?;
        Ok(record
            .addresses
            .iter()
            .find(|a| a.default)
            .or_else(|| record.addresses.first()))
    }

    pub fn payment_methods(&self, user_id: &UserId) -> Result<&[PaymentMethod]> {
        self.record(user_id).map(|r| r.payment_methods.as_slice())
    }

    pub fn default_payment_method(&self, user_id: &UserId) -> Result<Option<&PaymentMethod>> {
        let record = self.record(user_id)?;
        Ok(record
            .payment_methods
            .iter()
            .find(|m| m.default)
            .or_else(|| record.payment_methods.first()))
    }

    /// Whether a payment method id belongs to the user and is verified
    pub fn payment_method(&self, user_id: &UserId, payment_method_id: &str) -> Result<&PaymentMethod> {
        self.record(user_id)?
            .payment_methods
            .iter()
            .find(|m| m.payment_method_id == payment_method_id)
            .ok_or_else(|| AgentError::UnknownPaymentMethod {
                user_id: user_id.to_string(),
                payment_method_id: payment_method_id.to_string(),
            })
    }

    fn record(&self, user_id: &UserId) -> Result<&UserRecord> {
        self.users.get(user_id).ok_or_else(|| AgentError::UnknownUser {
            user_id: user_id.to_string(),
        })
    }
}
