//! Canonical binary encoding and content digests.
//!
//! The encoding is the standard contract ABI head/tail layout, applied to a
//! sequence of values in the order their types are declared. The digest is
//! keccak-256 over those bytes, so a tuple hashes the same on every peer and
//! the same as it would on the remote ledger itself.

use std::fmt;
use std::str::FromStr;

use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::abi::types::AbiType;
use crate::abi::value::AbiValue;

/// Errors produced when values do not line up with their declared types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// Value count differs from type count.
    #[error("expected {expected} values, got {actual}")]
    ArityMismatch {
        /// Number of declared types.
        expected: usize,
        /// Number of values given.
        actual: usize,
    },

    /// A value is not of its declared type.
    #[error("value does not match declared type {expected}")]
    TypeMismatch {
        /// Canonical name of the declared type.
        expected: String,
    },
}

/// A 256-bit content digest, used as a record's primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Wraps raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Digest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes).map_err(|e| format!("invalid digest '{s}': {e}"))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// keccak-256 of `bytes`.
#[must_use]
pub fn content_digest(bytes: &[u8]) -> Digest {
    Digest(keccak_hash::keccak(bytes).0)
}

/// Encodes `values` as the ABI parameter sequence described by `types`.
pub fn encode(types: &[AbiType], values: &[AbiValue]) -> Result<Vec<u8>, EncodeError> {
    if types.len() != values.len() {
        return Err(EncodeError::ArityMismatch {
            expected: types.len(),
            actual: values.len(),
        });
    }
    let items: Vec<(&AbiType, &AbiValue)> = types.iter().zip(values).collect();
    encode_sequence(&items)
}

/// Encodes and hashes in one step.
pub fn encode_digest(types: &[AbiType], values: &[AbiValue]) -> Result<Digest, EncodeError> {
    encode(types, values).map(|bytes| content_digest(&bytes))
}

fn word_from_usize(v: usize) -> [u8; 32] {
    word_from_u256(U256::from(v))
}

fn word_from_u256(v: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    v.to_big_endian(&mut word);
    word
}

fn padded(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    let rem = out.len() % 32;
    if rem != 0 {
        out.resize(out.len() + 32 - rem, 0);
    }
    out
}

fn encode_sequence(items: &[(&AbiType, &AbiValue)]) -> Result<Vec<u8>, EncodeError> {
    let head_len: usize = items.iter().map(|(ty, _)| ty.head_size()).sum();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for (ty, value) in items {
        let encoded = encode_value(ty, value)?;
        if ty.is_dynamic() {
            head.extend_from_slice(&word_from_usize(head_len + tail.len()));
            tail.extend(encoded);
        } else {
            head.extend(encoded);
        }
    }

    head.extend(tail);
    Ok(head)
}

fn encode_value(ty: &AbiType, value: &AbiValue) -> Result<Vec<u8>, EncodeError> {
    let mismatch = || EncodeError::TypeMismatch {
        expected: ty.canonical(),
    };

    match (ty, value) {
        (AbiType::Address, AbiValue::Address(a)) => {
            let mut word = [0u8; 32];
            word[12..].copy_from_slice(a.as_bytes());
            Ok(word.to_vec())
        }
        (AbiType::Bool, AbiValue::Bool(b)) => Ok(word_from_usize(usize::from(*b)).to_vec()),
        (AbiType::Uint { .. }, AbiValue::Uint(v)) | (AbiType::Int { .. }, AbiValue::Int(v)) => {
            Ok(word_from_u256(*v).to_vec())
        }
        (AbiType::FixedBytes { len }, AbiValue::FixedBytes(b)) if b.len() == usize::from(*len) => {
            Ok(padded(b))
        }
        (AbiType::Bytes, AbiValue::Bytes(b)) => {
            let mut out = word_from_usize(b.len()).to_vec();
            out.extend(padded(b));
            Ok(out)
        }
        (AbiType::String, AbiValue::String(s)) => {
            let mut out = word_from_usize(s.len()).to_vec();
            out.extend(padded(s.as_bytes()));
            Ok(out)
        }
        (AbiType::Array { element }, AbiValue::Array(items)) => {
            let seq: Vec<(&AbiType, &AbiValue)> = items.iter().map(|v| (element.as_ref(), v)).collect();
            let mut out = word_from_usize(items.len()).to_vec();
            out.extend(encode_sequence(&seq)?);
            Ok(out)
        }
        (AbiType::FixedArray { element, len }, AbiValue::Array(items)) if items.len() == *len => {
            let seq: Vec<(&AbiType, &AbiValue)> = items.iter().map(|v| (element.as_ref(), v)).collect();
            encode_sequence(&seq)
        }
        (AbiType::Tuple { components }, AbiValue::Tuple(items)) if items.len() == components.len() => {
            let seq: Vec<(&AbiType, &AbiValue)> =
                components.iter().map(|c| &c.ty).zip(items).collect();
            encode_sequence(&seq)
        }
        _ => Err(mismatch()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::types::Component;
    use crate::address::Address;

    fn words(hex_words: &[&str]) -> Vec<u8> {
        hex_words
            .iter()
            .flat_map(|w| hex::decode(w).unwrap())
            .collect()
    }

    #[test]
    fn keccak_of_empty_input() {
        assert_eq!(
            content_digest(&[]).to_string(),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn static_values_fill_one_word_each() {
        let bytes = encode(
            &[AbiType::Uint { bits: 256 }, AbiType::Bool],
            &[AbiValue::uint(1), AbiValue::Bool(true)],
        )
        .unwrap();
        assert_eq!(
            bytes,
            words(&[
                "0000000000000000000000000000000000000000000000000000000000000001",
                "0000000000000000000000000000000000000000000000000000000000000001",
            ])
        );
    }

    #[test]
    fn dynamic_values_use_offsets() {
        // abi.encode(uint256(100), "hi")
        let bytes = encode(
            &[AbiType::Uint { bits: 256 }, AbiType::String],
            &[AbiValue::uint(100), AbiValue::String("hi".to_string())],
        )
        .unwrap();
        assert_eq!(
            bytes,
            words(&[
                "0000000000000000000000000000000000000000000000000000000000000064",
                "0000000000000000000000000000000000000000000000000000000000000040",
                "0000000000000000000000000000000000000000000000000000000000000002",
                "6869000000000000000000000000000000000000000000000000000000000000",
            ])
        );
    }

    #[test]
    fn dynamic_array_of_static_elements() {
        // abi.encode(uint8[]([1, 2]))
        let bytes = encode(
            &[AbiType::parse("uint8[]").unwrap()],
            &[AbiValue::Array(vec![AbiValue::uint(1), AbiValue::uint(2)])],
        )
        .unwrap();
        assert_eq!(
            bytes,
            words(&[
                "0000000000000000000000000000000000000000000000000000000000000020",
                "0000000000000000000000000000000000000000000000000000000000000002",
                "0000000000000000000000000000000000000000000000000000000000000001",
                "0000000000000000000000000000000000000000000000000000000000000002",
            ])
        );
    }

    #[test]
    fn address_is_left_padded_and_negative_int_sign_extended() {
        let addr = Address::from_bytes([0x11; 20]);
        let bytes = encode(
            &[AbiType::Address, AbiType::Int { bits: 32 }],
            &[AbiValue::Address(addr), AbiValue::int(-2)],
        )
        .unwrap();
        assert_eq!(&bytes[..12], &[0u8; 12]);
        assert_eq!(&bytes[12..32], &[0x11; 20]);
        assert_eq!(&bytes[32..63], &[0xff; 31]);
        assert_eq!(bytes[63], 0xfe);
    }

    #[test]
    fn fixed_bytes_are_right_padded() {
        let bytes = encode(
            &[AbiType::FixedBytes { len: 2 }],
            &[AbiValue::FixedBytes(vec![0xab, 0xcd])],
        )
        .unwrap();
        assert_eq!(&bytes[..2], &[0xab, 0xcd]);
        assert!(bytes[2..].iter().all(|b| *b == 0));
    }

    #[test]
    fn nested_dynamic_tuple_gets_its_own_offset() {
        let tuple = AbiType::Tuple {
            components: vec![
                Component::new("id", AbiType::Uint { bits: 256 }),
                Component::new("name", AbiType::String),
            ],
        };
        let bytes = encode(
            &[AbiType::Bool, tuple],
            &[
                AbiValue::Bool(false),
                AbiValue::Tuple(vec![AbiValue::uint(7), AbiValue::String("a".to_string())]),
            ],
        )
        .unwrap();
        // head: bool, offset(0x40); tail: id, offset(0x40), len, data
        assert_eq!(bytes.len(), 32 * 6);
        assert_eq!(bytes[63], 0x40);
        assert_eq!(bytes[95], 7);
        assert_eq!(bytes[127], 0x40);
        assert_eq!(bytes[159], 1);
        assert_eq!(bytes[160], b'a');
    }

    #[test]
    fn mismatched_values_are_rejected() {
        assert_eq!(
            encode(&[AbiType::Bool], &[]),
            Err(EncodeError::ArityMismatch { expected: 1, actual: 0 })
        );
        assert!(matches!(
            encode(&[AbiType::Bool], &[AbiValue::uint(1)]),
            Err(EncodeError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn digest_parses_back_from_display() {
        let d = content_digest(b"mirror");
        let parsed: Digest = d.to_string().parse().unwrap();
        assert_eq!(parsed, d);
    }
}
