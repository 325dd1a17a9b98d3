//! Domain primitives: Timestamp, Address, PositionId.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Seconds in one day.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Seconds in one week.
pub const SECONDS_PER_WEEK: u64 = 7 * SECONDS_PER_DAY;

/// Logical time in whole seconds since Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The "never set" timestamp.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Create a Timestamp from seconds.
    pub fn new(secs: u64) -> Self {
        Timestamp(secs)
    }

    /// Get the underlying seconds value.
    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Seconds elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn seconds_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Timestamp `secs` seconds after this one.
    pub fn plus(&self, secs: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(secs))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account or token address (lowercase `0x`-prefixed hex).
///
/// Providers, pool tokens and reserve tokens all share this type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressParseError {
    #[error("address must start with 0x")]
    MissingPrefix,
    #[error("address must be 40 hex digits after 0x, got {0:?}")]
    InvalidHex(String),
}

impl Address {
    /// Create an Address from a string without validation.
    pub fn new(addr: String) -> Self {
        Address(addr)
    }

    /// The all-zero address, never a valid provider or token.
    pub fn zero() -> Self {
        Address(format!("0x{}", "0".repeat(40)))
    }

    /// Get the address as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for an empty address or one made only of zero digits.
    pub fn is_zero(&self) -> bool {
        let digits = self.0.strip_prefix("0x").unwrap_or(&self.0);
        digits.chars().all(|c| c == '0')
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or(AddressParseError::MissingPrefix)?;
        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressParseError::InvalidHex(hex_part.to_string()));
        }
        Ok(Address(format!("0x{}", hex_part.to_ascii_lowercase())))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a liquidity position, assigned by the position ledger.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PositionId(pub u64);

impl PositionId {
    pub fn new(id: u64) -> Self {
        PositionId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_normalizes_case() {
        let addr = Address::from_str("0xABCDEF0000000000000000000000000000000001").unwrap();
        assert_eq!(addr.as_str(), "0xabcdef0000000000000000000000000000000001");
    }

    #[test]
    fn test_address_parse_rejects_bad_input() {
        assert_eq!(
            Address::from_str("abcdef"),
            Err(AddressParseError::MissingPrefix)
        );
        assert!(matches!(
            Address::from_str("0x123"),
            Err(AddressParseError::InvalidHex(_))
        ));
        assert!(matches!(
            Address::from_str("0xzz00000000000000000000000000000000000000"),
            Err(AddressParseError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_zero_address() {
        assert!(Address::zero().is_zero());
        assert!(Address::new(String::new()).is_zero());
        assert!(!Address::new("0x01".to_string()).is_zero());
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp::new(100);
        assert_eq!(t.plus(SECONDS_PER_DAY).as_secs(), 100 + SECONDS_PER_DAY);
        assert_eq!(t.seconds_since(Timestamp::new(40)), 60);
        assert_eq!(t.seconds_since(Timestamp::new(400)), 0);
    }

    #[test]
    fn test_timestamp_serializes_as_number() {
        let json = serde_json::to_string(&Timestamp::new(42)).unwrap();
        assert_eq!(json, "42");
    }
}
