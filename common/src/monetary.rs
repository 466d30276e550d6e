//! Currency codes.
//!
//! Amounts are plain `i64` values in the currency's smallest unit; the ledger
//! never converts between currencies.

use serde::{Deserialize, Serialize};
use std::fmt;

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Currencies the ledger accepts for new accounts.
    pub const SUPPORTED: [&'static str; 4] = ["USD", "EUR", "CAD", "BRL"];

    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Check the code is one of [`Currency::SUPPORTED`].
    pub fn is_supported(&self) -> bool {
        Self::SUPPORTED.contains(&self.0.as_str())
    }

    /// Common currencies
    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn cad() -> Self {
        Self::new("CAD")
    }

    pub fn brl() -> Self {
        Self::new("BRL")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Currency {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
