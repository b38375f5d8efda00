//! Account and contract addresses.
//!
//! Addresses are 20-byte identifiers. They are always rendered as lowercase
//! `0x`-prefixed hex so that every peer derives the same topic and the same
//! record fields from the same address.

use std::fmt;
use std::str::FromStr;

use primitive_types::H160;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::InvocationError;

/// A 20-byte account or contract address.
///
/// # Examples
///
/// ```
/// use worldmirror::Address;
///
/// let addr: Address = "0xAAaa000000000000000000000000000000000001".parse().unwrap();
/// assert_eq!(addr.to_string(), "0xaaaa000000000000000000000000000000000001");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(H160);

impl Address {
    /// Length of an address in bytes.
    pub const LEN: usize = 20;

    /// Creates an address from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(H160(bytes))
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// The all-zero address.
    #[must_use]
    pub const fn zero() -> Self {
        Self(H160([0u8; 20]))
    }

    /// Returns true for the all-zero address.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Lowercase `0x`-prefixed hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0.as_bytes()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Address {
    type Err = InvocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.len() != Self::LEN * 2 {
            return Err(InvocationError::InvalidArgument {
                reason: format!("address '{s}' must be {} hex digits", Self::LEN * 2),
            });
        }

        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes).map_err(|e| InvocationError::InvalidArgument {
            reason: format!("address '{s}' is not valid hex: {e}"),
        })?;
        Ok(Self::from_bytes(bytes))
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<H160> for Address {
    fn from(h: H160) -> Self {
        Self(h)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_case_and_renders_lowercase() {
        let addr: Address = "0xDEADbeef00000000000000000000000000000000".parse().unwrap();
        assert_eq!(addr.to_string(), "0xdeadbeef00000000000000000000000000000000");
    }

    #[test]
    fn accepts_missing_prefix() {
        let addr: Address = "0000000000000000000000000000000000000001".parse().unwrap();
        assert_eq!(addr.as_bytes()[19], 1);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!("0x1234".parse::<Address>().is_err());
    }

    #[test]
    fn rejects_non_hex() {
        assert!("0xzz00000000000000000000000000000000000000".parse::<Address>().is_err());
    }

    #[test]
    fn serde_uses_hex_string() {
        let addr = Address::from_bytes([0xAB; 20]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "ab".repeat(20)));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
