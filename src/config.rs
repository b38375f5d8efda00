//! Mirror configuration.
//!
//! The world configuration declares the remote tables and callable units
//! (systems). The mirror configuration wraps it together with the
//! eligibility settings and type translation overrides.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::actions::{EligibilityRules, EligibilitySettings};
use crate::error::ConfigurationError;
use crate::schema::{PropertyType, SchemaOptions, TableDescriptor, TypeTranslator};

/// A callable unit declared in the world configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemDescriptor {
    /// Registered name; defaults to the key it is declared under.
    #[serde(default)]
    pub name: String,
    /// Callable by any account.
    #[serde(default = "default_open_access")]
    pub open_access: bool,
}

const fn default_open_access() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawWorldConfig {
    #[serde(default)]
    tables: BTreeMap<String, TableDescriptor>,
    #[serde(default)]
    systems: BTreeMap<String, SystemDescriptor>,
}

/// Remote tables and systems of a world.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawWorldConfig")]
pub struct WorldConfig {
    /// Remote tables by name.
    pub tables: BTreeMap<String, TableDescriptor>,
    /// Callable units by name.
    pub systems: BTreeMap<String, SystemDescriptor>,
}

impl From<RawWorldConfig> for WorldConfig {
    fn from(raw: RawWorldConfig) -> Self {
        let tables = raw
            .tables
            .into_iter()
            .map(|(name, mut table)| {
                table.name.clone_from(&name);
                (name, table)
            })
            .collect();
        let systems = raw
            .systems
            .into_iter()
            .map(|(key, mut system)| {
                if system.name.is_empty() {
                    system.name.clone_from(&key);
                }
                (key, system)
            })
            .collect();
        Self { tables, systems }
    }
}

impl WorldConfig {
    /// Parses a world declaration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(json).map_err(|e| ConfigurationError::Load {
            message: format!("world configuration: {e}"),
        })
    }

    /// Adds a table, keyed by its name.
    #[must_use]
    pub fn with_table(mut self, table: TableDescriptor) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Adds a system under `unit`.
    #[must_use]
    pub fn with_system(mut self, unit: impl Into<String>) -> Self {
        let unit = unit.into();
        self.systems.insert(
            unit.clone(),
            SystemDescriptor {
                name: unit,
                open_access: true,
            },
        );
        self
    }

    /// Callable unit names, which are also the interface file names.
    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.systems.keys().map(String::as_str)
    }
}

/// Full configuration of a mirror instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MirrorConfig {
    /// Remote world declaration.
    pub world: WorldConfig,
    /// Which functions become actions.
    pub eligibility: EligibilitySettings,
    /// Remote type string to local type.
    pub type_overrides: BTreeMap<String, PropertyType>,
    /// Also mirror key-schema fields, as strings.
    pub include_key_fields: bool,
}

impl MirrorConfig {
    /// Configuration with default rules.
    #[must_use]
    pub fn new(world: WorldConfig) -> Self {
        Self {
            world,
            ..Self::default()
        }
    }

    /// Parses configuration JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(json).map_err(|e| ConfigurationError::Load {
            message: e.to_string(),
        })
    }

    /// Reads configuration JSON from a file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Load {
            message: format!("{}: {e}", path.display()),
        })?;
        Self::from_json_str(&json)
    }

    /// Schema synthesis options.
    #[must_use]
    pub fn schema_options(&self) -> SchemaOptions {
        SchemaOptions {
            translator: TypeTranslator::from_overrides(self.type_overrides.clone()),
            include_key_fields: self.include_key_fields,
        }
    }

    /// Compiled eligibility rules.
    pub fn eligibility_rules(&self) -> Result<EligibilityRules, ConfigurationError> {
        self.eligibility.compile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORLD: &str = r#"{
        "tables": {
            "OffchainMessagesTable": {
                "keySchema": {},
                "schema": {"from": "address", "timestamp": "uint256", "message": "string"},
                "offchainOnly": true
            },
            "CounterTable": {"keySchema": {}, "schema": "uint32"}
        },
        "systems": {
            "MessagingSystem": {"name": "messaging", "openAccess": true},
            "IncrementSystem": {}
        }
    }"#;

    #[test]
    fn world_config_fills_names() {
        let world = WorldConfig::from_json_str(WORLD).unwrap();
        assert_eq!(world.tables["OffchainMessagesTable"].name, "OffchainMessagesTable");
        assert!(world.tables["OffchainMessagesTable"].offchain_only);
        assert!(!world.tables["CounterTable"].offchain_only);
        assert_eq!(world.systems["MessagingSystem"].name, "messaging");
        assert_eq!(world.systems["IncrementSystem"].name, "IncrementSystem");
        assert_eq!(
            world.units().collect::<Vec<_>>(),
            vec!["IncrementSystem", "MessagingSystem"]
        );
    }

    #[test]
    fn mirror_config_defaults_and_overrides() {
        let json = format!(
            r#"{{"world": {WORLD}, "typeOverrides": {{"uint64": "integer"}}, "includeKeyFields": true}}"#
        );
        let config = MirrorConfig::from_json_str(&json).unwrap();
        assert_eq!(config.eligibility, EligibilitySettings::default());
        assert!(config.schema_options().include_key_fields);
        assert_eq!(
            config.schema_options().translator.translate("uint64"),
            PropertyType::Integer
        );
    }

    #[test]
    fn load_errors_are_configuration_errors() {
        assert!(matches!(
            MirrorConfig::from_json_str("{"),
            Err(ConfigurationError::Load { .. })
        ));
        assert!(matches!(
            MirrorConfig::from_json_file("/nonexistent/mirror.json"),
            Err(ConfigurationError::Load { .. })
        ));
    }

    #[test]
    fn from_json_file_reads_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.json");
        std::fs::write(&path, format!(r#"{{"world": {WORLD}}}"#)).unwrap();
        let config = MirrorConfig::from_json_file(&path).unwrap();
        assert_eq!(config.world.tables.len(), 2);
    }
}
