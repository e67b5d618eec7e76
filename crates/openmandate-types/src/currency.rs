//! Currency types for OpenMandate
//!
//! The closed set of currencies the simulated payment network settles in.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Settlement currency (ISO 4217 subset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Currency {
    #[default]
    USD,
    EUR,
    GBP,
}

impl Currency {
    /// Get the ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
        }
    }

    /// Get the standard decimal places for this currency
    pub fn decimals(&self) -> u8 {
        2
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
