//! Interface files and function descriptors.
//!
//! One interface file exists per callable unit (system). Entries that are not
//! functions (events, errors, constructors) are skipped; function entries are
//! parsed strictly so that an unusable type is reported at setup.

use serde::{Deserialize, Serialize};

use crate::abi::encode::content_digest;
use crate::abi::types::{AbiType, Component};
use crate::error::ConfigurationError;

/// Mutability classifier of a remote function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mutability {
    /// Reads no state.
    Pure,
    /// Reads but does not write state.
    View,
    /// May write state, rejects value.
    NonPayable,
    /// May write state and accept value.
    Payable,
}

impl Mutability {
    /// Parses the `stateMutability` field of an interface entry.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pure" => Some(Self::Pure),
            "view" => Some(Self::View),
            "nonpayable" => Some(Self::NonPayable),
            "payable" => Some(Self::Payable),
            _ => None,
        }
    }
}

/// A typed function parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name, empty when unnamed.
    pub name: String,
    /// Declared type.
    pub ty: AbiType,
    /// Source-level type name, e.g. `struct MessagesTableData`.
    pub internal_type: Option<String>,
}

impl Param {
    /// Creates a parameter without an internal type.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: AbiType) -> Self {
        Self {
            name: name.into(),
            ty,
            internal_type: None,
        }
    }

    /// Sets the internal type name.
    #[must_use]
    pub fn with_internal_type(mut self, internal_type: impl Into<String>) -> Self {
        self.internal_type = Some(internal_type.into());
        self
    }

    /// Tuple components, if this parameter is a tuple.
    #[must_use]
    pub fn components(&self) -> Option<&[Component]> {
        match &self.ty {
            AbiType::Tuple { components } => Some(components),
            _ => None,
        }
    }
}

/// A remote function descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    /// Function name.
    pub name: String,
    /// Declared inputs, in call order.
    pub inputs: Vec<Param>,
    /// Declared outputs.
    pub outputs: Vec<Param>,
    /// Declared mutability.
    pub mutability: Mutability,
}

impl FunctionDescriptor {
    /// Canonical signature, e.g. `register(string,address)`.
    #[must_use]
    pub fn signature(&self) -> String {
        let inputs: Vec<String> = self.inputs.iter().map(|p| p.ty.canonical()).collect();
        format!("{}({})", self.name, inputs.join(","))
    }

    /// First four bytes of the keccak-256 of the signature.
    #[must_use]
    pub fn selector(&self) -> [u8; 4] {
        let digest = content_digest(self.signature().as_bytes());
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&digest.as_bytes()[..4]);
        selector
    }

    /// Declared input types in order.
    #[must_use]
    pub fn input_types(&self) -> Vec<AbiType> {
        self.inputs.iter().map(|p| p.ty.clone()).collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawParam {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    ty: String,
    #[serde(default, rename = "internalType")]
    internal_type: Option<String>,
    #[serde(default)]
    components: Option<Vec<RawParam>>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(rename = "type", default = "default_entry_type")]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    inputs: Vec<RawParam>,
    #[serde(default)]
    outputs: Vec<RawParam>,
    #[serde(default, rename = "stateMutability")]
    state_mutability: Option<String>,
}

fn default_entry_type() -> String {
    "function".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawInterface {
    Entries(Vec<RawEntry>),
    Artifact { abi: Vec<RawEntry> },
}

fn convert_components(raw: Vec<RawParam>) -> Result<Vec<Component>, String> {
    raw.into_iter()
        .map(|p| {
            let param = convert_param(p)?;
            Ok(Component::new(param.name, param.ty))
        })
        .collect()
}

fn convert_param(raw: RawParam) -> Result<Param, String> {
    let components = raw.components.map(convert_components).transpose()?;
    let ty = AbiType::parse_with_components(&raw.ty, components)
        .map_err(|e| format!("parameter '{}': {e}", raw.name))?;
    Ok(Param {
        name: raw.name,
        ty,
        internal_type: raw.internal_type,
    })
}

/// The parsed interface of one callable unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interface {
    /// Functions in declaration order.
    pub functions: Vec<FunctionDescriptor>,
}

impl Interface {
    /// Parses an interface file for the named unit.
    ///
    /// Accepts a bare entry array or a compiler artifact with an `abi` field.
    pub fn from_json(unit: &str, json: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidInterface {
            unit: unit.to_string(),
            reason,
        };

        let raw: RawInterface =
            serde_json::from_str(json).map_err(|e| invalid(format!("malformed JSON: {e}")))?;
        let entries = match raw {
            RawInterface::Entries(entries) | RawInterface::Artifact { abi: entries } => entries,
        };

        let mut functions = Vec::new();
        for entry in entries {
            if entry.kind != "function" {
                continue;
            }
            let mutability = match entry.state_mutability.as_deref() {
                None => Mutability::NonPayable,
                Some(s) => Mutability::parse(s).ok_or_else(|| {
                    invalid(format!("function '{}': unknown stateMutability '{s}'", entry.name))
                })?,
            };
            let name = entry.name;
            let inputs = entry
                .inputs
                .into_iter()
                .map(convert_param)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| invalid(format!("function '{name}': {e}")))?;
            let outputs = entry
                .outputs
                .into_iter()
                .map(convert_param)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| invalid(format!("function '{name}': {e}")))?;
            functions.push(FunctionDescriptor {
                name,
                inputs,
                outputs,
                mutability,
            });
        }

        Ok(Self { functions })
    }

    /// Finds a function by name.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGING: &str = r#"[
        {"type": "function", "name": "sendOffchainMessage", "stateMutability": "nonpayable",
         "inputs": [{"name": "message", "type": "string", "internalType": "string"}],
         "outputs": [{"name": "", "type": "tuple", "internalType": "struct OffchainMessagesTableData",
                      "components": [
                        {"name": "from", "type": "address", "internalType": "address"},
                        {"name": "timestamp", "type": "uint256", "internalType": "uint256"},
                        {"name": "message", "type": "string", "internalType": "string"}
                      ]}]},
        {"type": "event", "name": "Sent", "inputs": [], "anonymous": false},
        {"type": "function", "name": "supportsInterface", "stateMutability": "pure",
         "inputs": [{"name": "interfaceId", "type": "bytes4"}],
         "outputs": [{"name": "", "type": "bool"}]}
    ]"#;

    #[test]
    fn parses_functions_and_skips_other_entries() {
        let iface = Interface::from_json("MessagingSystem", MESSAGING).unwrap();
        assert_eq!(iface.functions.len(), 2);

        let send = iface.function("sendOffchainMessage").unwrap();
        assert_eq!(send.mutability, Mutability::NonPayable);
        assert_eq!(send.signature(), "sendOffchainMessage(string)");
        let comps = send.outputs[0].components().unwrap();
        assert_eq!(comps.len(), 3);
        assert_eq!(comps[1].name, "timestamp");
        assert_eq!(
            send.outputs[0].internal_type.as_deref(),
            Some("struct OffchainMessagesTableData")
        );
    }

    #[test]
    fn accepts_compiler_artifacts() {
        let artifact = format!(r#"{{"abi": {MESSAGING}, "bytecode": "0x"}}"#);
        let iface = Interface::from_json("MessagingSystem", &artifact).unwrap();
        assert_eq!(iface.functions.len(), 2);
    }

    #[test]
    fn selector_matches_known_value() {
        let iface = Interface::from_json("Token", r#"[
            {"type": "function", "name": "transfer", "stateMutability": "nonpayable",
             "inputs": [{"name": "to", "type": "address"}, {"name": "amount", "type": "uint256"}],
             "outputs": [{"name": "", "type": "bool"}]}
        ]"#)
        .unwrap();
        assert_eq!(iface.functions[0].selector(), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn unknown_types_are_rejected_at_load() {
        let err = Interface::from_json("Broken", r#"[
            {"type": "function", "name": "f", "stateMutability": "view",
             "inputs": [{"name": "x", "type": "uint7"}], "outputs": []}
        ]"#)
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidInterface { .. }));
        assert!(err.to_string().contains("Broken"));
    }

    #[test]
    fn unknown_mutability_is_rejected() {
        let err = Interface::from_json("Broken", r#"[
            {"type": "function", "name": "f", "stateMutability": "sideways", "inputs": [], "outputs": []}
        ]"#)
        .unwrap_err();
        assert!(err.to_string().contains("sideways"));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(Interface::from_json("Broken", "{not json").is_err());
    }
}
