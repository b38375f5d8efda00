//! Typed remote parameter types.
//!
//! Type strings from interface files are parsed once, at setup, into
//! [`AbiType`]. Anything that does not parse is rejected there rather than
//! surfacing as a call-time failure.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named component of a tuple type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    /// Component name (may be empty for anonymous components).
    pub name: String,
    /// Component type.
    pub ty: AbiType,
}

impl Component {
    /// Creates a named component.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: AbiType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A remote parameter type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbiType {
    /// 20-byte account address.
    Address,
    /// Boolean.
    Bool,
    /// Unsigned integer with the given bit width (8..=256, multiple of 8).
    Uint { bits: u16 },
    /// Signed integer with the given bit width (8..=256, multiple of 8).
    Int { bits: u16 },
    /// `bytesN` with N in 1..=32.
    FixedBytes { len: u8 },
    /// Dynamic byte string.
    Bytes,
    /// UTF-8 string.
    String,
    /// Dynamic-length array.
    Array { element: Box<AbiType> },
    /// Fixed-length array.
    FixedArray { element: Box<AbiType>, len: usize },
    /// Struct of named components.
    Tuple { components: Vec<Component> },
}

/// Reason a type string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeParseError(pub String);

impl fmt::Display for TypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AbiType {
    /// Parses an elementary (non-tuple) type string such as `uint256`,
    /// `address[]` or `bytes32[4]`.
    pub fn parse(ty: &str) -> Result<Self, TypeParseError> {
        Self::parse_with_components(ty, None)
    }

    /// Parses a type string, resolving `tuple` bases against `components`.
    pub fn parse_with_components(
        ty: &str,
        components: Option<Vec<Component>>,
    ) -> Result<Self, TypeParseError> {
        let ty = ty.trim();

        if let Some(open) = ty.strip_suffix(']').and_then(|s| s.rfind('[')) {
            let base = &ty[..open];
            let dim = &ty[open + 1..ty.len() - 1];
            let element = Box::new(Self::parse_with_components(base, components)?);
            if dim.is_empty() {
                return Ok(Self::Array { element });
            }
            let len: usize = dim
                .parse()
                .map_err(|_| TypeParseError(format!("invalid array length in '{ty}'")))?;
            if len == 0 {
                return Err(TypeParseError(format!("zero-length array in '{ty}'")));
            }
            return Ok(Self::FixedArray { element, len });
        }

        if ty == "tuple" {
            return match components {
                Some(components) => Ok(Self::Tuple { components }),
                None => Err(TypeParseError("tuple without components".to_string())),
            };
        }

        match ty {
            "address" => return Ok(Self::Address),
            "bool" => return Ok(Self::Bool),
            "string" => return Ok(Self::String),
            "bytes" => return Ok(Self::Bytes),
            "uint" => return Ok(Self::Uint { bits: 256 }),
            "int" => return Ok(Self::Int { bits: 256 }),
            _ => {}
        }

        if let Some(bits) = ty.strip_prefix("uint") {
            return parse_bits(ty, bits).map(|bits| Self::Uint { bits });
        }
        if let Some(bits) = ty.strip_prefix("int") {
            return parse_bits(ty, bits).map(|bits| Self::Int { bits });
        }
        if let Some(len) = ty.strip_prefix("bytes") {
            let len: u8 = len
                .parse()
                .map_err(|_| TypeParseError(format!("unknown type '{ty}'")))?;
            if (1..=32).contains(&len) {
                return Ok(Self::FixedBytes { len });
            }
            return Err(TypeParseError(format!("invalid fixed bytes width in '{ty}'")));
        }

        Err(TypeParseError(format!("unknown type '{ty}'")))
    }

    /// Returns true if the encoding of this type has a dynamic (tail) part.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        match self {
            Self::Bytes | Self::String | Self::Array { .. } => true,
            Self::FixedArray { element, .. } => element.is_dynamic(),
            Self::Tuple { components } => components.iter().any(|c| c.ty.is_dynamic()),
            _ => false,
        }
    }

    /// Size in bytes of the head slot this type occupies inside a sequence.
    #[must_use]
    pub fn head_size(&self) -> usize {
        if self.is_dynamic() {
            return 32;
        }
        match self {
            Self::FixedArray { element, len } => element.head_size() * len,
            Self::Tuple { components } => components.iter().map(|c| c.ty.head_size()).sum(),
            _ => 32,
        }
    }

    /// Canonical type string as used in function signatures.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Address => "address".to_string(),
            Self::Bool => "bool".to_string(),
            Self::Uint { bits } => format!("uint{bits}"),
            Self::Int { bits } => format!("int{bits}"),
            Self::FixedBytes { len } => format!("bytes{len}"),
            Self::Bytes => "bytes".to_string(),
            Self::String => "string".to_string(),
            Self::Array { element } => format!("{}[]", element.canonical()),
            Self::FixedArray { element, len } => format!("{}[{len}]", element.canonical()),
            Self::Tuple { components } => {
                let inner: Vec<String> = components.iter().map(|c| c.ty.canonical()).collect();
                format!("({})", inner.join(","))
            }
        }
    }
}

impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

fn parse_bits(ty: &str, digits: &str) -> Result<u16, TypeParseError> {
    let bits: u16 = digits
        .parse()
        .map_err(|_| TypeParseError(format!("unknown type '{ty}'")))?;
    if bits == 0 || bits > 256 || bits % 8 != 0 {
        return Err(TypeParseError(format!("invalid integer width in '{ty}'")));
    }
    Ok(bits)
}
