//! Typed remote values.
//!
//! Values reach the engine as JSON (action arguments and simulation results).
//! They are coerced against their declared [`AbiType`] before anything is
//! encoded, so every peer canonicalizes the same logical value to the same
//! bytes.

use primitive_types::U256;
use serde_json::{Map, Number, Value as Json};

use crate::abi::types::AbiType;
use crate::address::Address;

/// A value of a remote parameter type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    /// Address value.
    Address(Address),
    /// Boolean value.
    Bool(bool),
    /// Unsigned integer.
    Uint(U256),
    /// Signed integer held as its 256-bit two's complement.
    Int(U256),
    /// `bytesN` contents.
    FixedBytes(Vec<u8>),
    /// Dynamic bytes.
    Bytes(Vec<u8>),
    /// UTF-8 string.
    String(String),
    /// Array elements, fixed or dynamic.
    Array(Vec<AbiValue>),
    /// Struct fields in declared order.
    Tuple(Vec<AbiValue>),
}

impl AbiValue {
    /// Signed integer value from an `i64`.
    #[must_use]
    pub fn int(v: i64) -> Self {
        let magnitude = U256::from(v.unsigned_abs());
        if v < 0 {
            Self::Int(negate(magnitude))
        } else {
            Self::Int(magnitude)
        }
    }

    /// Unsigned integer value from a `u64`.
    #[must_use]
    pub fn uint(v: u64) -> Self {
        Self::Uint(U256::from(v))
    }

    /// Coerces a JSON value to the given type.
    ///
    /// Integers accept JSON numbers, decimal strings and `0x` hex strings.
    /// Byte values accept `0x` hex strings. Tuples accept objects keyed by
    /// component name or positional arrays.
    pub fn from_json(ty: &AbiType, json: &Json) -> Result<Self, String> {
        match ty {
            AbiType::Address => {
                let s = expect_str(ty, json)?;
                s.parse::<Address>()
                    .map(Self::Address)
                    .map_err(|e| e.to_string())
            }
            AbiType::Bool => json
                .as_bool()
                .map(Self::Bool)
                .ok_or_else(|| mismatch(ty, json)),
            AbiType::Uint { bits } => {
                let v = parse_unsigned(ty, json)?;
                if *bits < 256 && v >= (U256::one() << usize::from(*bits)) {
                    return Err(format!("value {v} does not fit in {ty}"));
                }
                Ok(Self::Uint(v))
            }
            AbiType::Int { bits } => parse_signed(ty, *bits, json).map(Self::Int),
            AbiType::FixedBytes { len } => {
                let bytes = parse_hex_bytes(ty, json)?;
                if bytes.len() != usize::from(*len) {
                    return Err(format!("expected {len} bytes for {ty}, got {}", bytes.len()));
                }
                Ok(Self::FixedBytes(bytes))
            }
            AbiType::Bytes => parse_hex_bytes(ty, json).map(Self::Bytes),
            AbiType::String => expect_str(ty, json).map(|s| Self::String(s.to_string())),
            AbiType::Array { element } => {
                let items = json.as_array().ok_or_else(|| mismatch(ty, json))?;
                items
                    .iter()
                    .map(|item| Self::from_json(element, item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::Array)
            }
            AbiType::FixedArray { element, len } => {
                let items = json.as_array().ok_or_else(|| mismatch(ty, json))?;
                if items.len() != *len {
                    return Err(format!("expected {len} elements for {ty}, got {}", items.len()));
                }
                items
                    .iter()
                    .map(|item| Self::from_json(element, item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::Array)
            }
            AbiType::Tuple { components } => match json {
                Json::Object(fields) => components
                    .iter()
                    .map(|c| {
                        let field = fields
                            .get(&c.name)
                            .ok_or_else(|| format!("missing tuple component '{}'", c.name))?;
                        Self::from_json(&c.ty, field)
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::Tuple),
                Json::Array(items) if items.len() == components.len() => components
                    .iter()
                    .zip(items)
                    .map(|(c, item)| Self::from_json(&c.ty, item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::Tuple),
                _ => Err(mismatch(ty, json)),
            },
        }
    }

    /// Canonical JSON rendering.
    ///
    /// Integers render as decimal strings, addresses and bytes as lowercase
    /// `0x` hex, tuples as objects when every component is named.
    #[must_use]
    pub fn to_json(&self, ty: &AbiType) -> Json {
        match (self, ty) {
            (Self::Address(a), _) => Json::String(a.to_hex()),
            (Self::Bool(b), _) => Json::Bool(*b),
            (Self::Uint(v), _) => Json::String(v.to_string()),
            (Self::Int(v), _) => Json::String(signed_to_string(*v)),
            (Self::FixedBytes(b) | Self::Bytes(b), _) => {
                Json::String(format!("0x{}", hex::encode(b)))
            }
            (Self::String(s), _) => Json::String(s.clone()),
            (Self::Array(items), AbiType::Array { element } | AbiType::FixedArray { element, .. }) => {
                Json::Array(items.iter().map(|item| item.to_json(element)).collect())
            }
            (Self::Tuple(items), AbiType::Tuple { components })
                if components.iter().all(|c| !c.name.is_empty()) =>
            {
                let mut map = Map::new();
                for (c, item) in components.iter().zip(items) {
                    map.insert(c.name.clone(), item.to_json(&c.ty));
                }
                Json::Object(map)
            }
            (Self::Tuple(items), AbiType::Tuple { components }) => Json::Array(
                components
                    .iter()
                    .zip(items)
                    .map(|(c, item)| item.to_json(&c.ty))
                    .collect(),
            ),
            (Self::Array(items) | Self::Tuple(items), _) => {
                Json::Array(items.iter().map(|item| item.to_json(&AbiType::Bytes)).collect())
            }
        }
    }

    /// Returns the value as an `i64` if it is an integer that fits.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Uint(v) => (*v <= U256::from(i64::MAX as u64)).then(|| v.low_u64() as i64),
            Self::Int(v) => signed_to_string(*v).parse().ok(),
            _ => None,
        }
    }
}

/// Two's complement negation in 256 bits.
fn negate(v: U256) -> U256 {
    (!v).overflowing_add(U256::one()).0
}

fn is_negative(v: U256) -> bool {
    v.bit(255)
}

/// Decimal rendering of a two's complement 256-bit integer.
#[must_use]
pub fn signed_to_string(v: U256) -> String {
    if is_negative(v) {
        format!("-{}", negate(v))
    } else {
        v.to_string()
    }
}

fn mismatch(ty: &AbiType, json: &Json) -> String {
    format!("expected {ty}, got {json}")
}

fn expect_str<'a>(ty: &AbiType, json: &'a Json) -> Result<&'a str, String> {
    json.as_str().ok_or_else(|| mismatch(ty, json))
}

fn parse_hex_digits(ty: &AbiType, s: &str) -> Result<Vec<u8>, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| format!("expected 0x-prefixed hex for {ty}, got '{s}'"))?;
    if digits.len() % 2 == 1 {
        hex::decode(format!("0{digits}"))
    } else {
        hex::decode(digits)
    }
    .map_err(|e| format!("invalid hex for {ty}: {e}"))
}

fn parse_hex_bytes(ty: &AbiType, json: &Json) -> Result<Vec<u8>, String> {
    parse_hex_digits(ty, expect_str(ty, json)?)
}

fn number_to_u256(ty: &AbiType, n: &Number) -> Result<U256, String> {
    n.as_u64()
        .map(U256::from)
        .ok_or_else(|| format!("expected non-negative integer for {ty}, got {n}"))
}

fn parse_unsigned(ty: &AbiType, json: &Json) -> Result<U256, String> {
    match json {
        Json::Number(n) => number_to_u256(ty, n),
        Json::String(s) if s.starts_with("0x") || s.starts_with("0X") => {
            let bytes = parse_hex_digits(ty, s)?;
            if bytes.len() > 32 {
                return Err(format!("hex value too large for {ty}"));
            }
            Ok(U256::from_big_endian(&bytes))
        }
        Json::String(s) => {
            U256::from_dec_str(s.trim()).map_err(|_| format!("invalid integer '{s}' for {ty}"))
        }
        _ => Err(mismatch(ty, json)),
    }
}

fn parse_signed(ty: &AbiType, bits: u16, json: &Json) -> Result<U256, String> {
    let (negative, magnitude) = match json {
        Json::Number(n) => match n.as_i64() {
            Some(v) => (v < 0, U256::from(v.unsigned_abs())),
            None => (false, number_to_u256(ty, n)?),
        },
        Json::String(s) => {
            let s = s.trim();
            match s.strip_prefix('-') {
                Some(rest) => (
                    true,
                    U256::from_dec_str(rest).map_err(|_| format!("invalid integer '{s}' for {ty}"))?,
                ),
                None => (
                    false,
                    U256::from_dec_str(s).map_err(|_| format!("invalid integer '{s}' for {ty}"))?,
                ),
            }
        }
        _ => return Err(mismatch(ty, json)),
    };

    let limit = U256::one() << usize::from(bits - 1);
    if negative {
        if magnitude > limit {
            return Err(format!("value -{magnitude} does not fit in {ty}"));
        }
        Ok(negate(magnitude))
    } else {
        if magnitude >= limit {
            return Err(format!("value {magnitude} does not fit in {ty}"));
        }
        Ok(magnitude)
    }
}
