//! Action synthesis from remote interfaces.
//!
//! Every eligible function of every callable unit becomes one local action
//! with the function's name. Eligibility rules are configurable; the defaults
//! skip internal (`_`-prefixed) functions, pure functions and interface
//! introspection.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::abi::{FunctionDescriptor, Interface, Mutability};
use crate::error::ConfigurationError;

/// Serializable eligibility settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EligibilitySettings {
    /// Functions whose name starts with this prefix are internal.
    pub internal_prefix: String,
    /// Mutabilities that never become actions.
    pub excluded_mutabilities: Vec<Mutability>,
    /// Reserved introspection names.
    pub excluded_names: Vec<String>,
    /// Extra exclusion patterns, matched against the function name.
    pub exclude_patterns: Vec<String>,
}

impl Default for EligibilitySettings {
    fn default() -> Self {
        Self {
            internal_prefix: "_".to_string(),
            excluded_mutabilities: vec![Mutability::Pure],
            excluded_names: vec!["supportsInterface".to_string()],
            exclude_patterns: Vec::new(),
        }
    }
}

impl EligibilitySettings {
    /// Compiles the settings, validating every pattern.
    pub fn compile(&self) -> Result<EligibilityRules, ConfigurationError> {
        let patterns = self
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigurationError::InvalidRule {
                    reason: format!("pattern '{p}': {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EligibilityRules {
            internal_prefix: self.internal_prefix.clone(),
            excluded_mutabilities: self.excluded_mutabilities.clone(),
            excluded_names: self.excluded_names.iter().cloned().collect(),
            patterns,
        })
    }
}

/// Compiled eligibility rules.
#[derive(Debug, Clone)]
pub struct EligibilityRules {
    internal_prefix: String,
    excluded_mutabilities: Vec<Mutability>,
    excluded_names: BTreeSet<String>,
    patterns: Vec<Regex>,
}

impl Default for EligibilityRules {
    fn default() -> Self {
        let settings = EligibilitySettings::default();
        Self {
            internal_prefix: settings.internal_prefix,
            excluded_mutabilities: settings.excluded_mutabilities,
            excluded_names: settings.excluded_names.into_iter().collect(),
            patterns: Vec::new(),
        }
    }
}

impl EligibilityRules {
    /// Returns true if `function` should become a local action.
    #[must_use]
    pub fn is_eligible(&self, function: &FunctionDescriptor) -> bool {
        let name = function.name.as_str();
        !name.is_empty()
            && (self.internal_prefix.is_empty() || !name.starts_with(&self.internal_prefix))
            && !self.excluded_mutabilities.contains(&function.mutability)
            && !self.excluded_names.contains(name)
            && !self.patterns.iter().any(|p| p.is_match(name))
    }
}

/// A synthesized local action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec {
    /// Action name, equal to the function name.
    pub name: String,
    /// Callable unit that declares the function.
    pub unit: String,
    /// Remote function the action mirrors.
    pub function: Arc<FunctionDescriptor>,
}

/// All actions of one mirror instance, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSet {
    actions: BTreeMap<String, ActionSpec>,
}

impl ActionSet {
    /// Looks up an action by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.get(name)
    }

    /// Actions in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ActionSpec> {
        self.actions.values()
    }

    /// Action names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// Number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true if there are no actions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Synthesizes one action per eligible function.
///
/// # Errors
/// - `NoSystems` if `interfaces` is empty
/// - `DuplicateAction` if two eligible functions share a name
pub fn synthesize_actions(
    interfaces: &BTreeMap<String, Interface>,
    rules: &EligibilityRules,
) -> Result<ActionSet, ConfigurationError> {
    if interfaces.is_empty() {
        return Err(ConfigurationError::NoSystems);
    }

    let mut actions: BTreeMap<String, ActionSpec> = BTreeMap::new();
    for (unit, interface) in interfaces {
        for function in interface.functions.iter().filter(|f| rules.is_eligible(f)) {
            if let Some(existing) = actions.get(&function.name) {
                return Err(ConfigurationError::DuplicateAction {
                    name: function.name.clone(),
                    first: format!("{}.{}", existing.unit, existing.function.signature()),
                    second: format!("{unit}.{}", function.signature()),
                });
            }
            debug!(unit = %unit, action = %function.name, "synthesized action");
            actions.insert(
                function.name.clone(),
                ActionSpec {
                    name: function.name.clone(),
                    unit: unit.clone(),
                    function: Arc::new(function.clone()),
                },
            );
        }
    }

    Ok(ActionSet { actions })
}

/// Supplies the raw interface file of a callable unit.
#[async_trait]
pub trait InterfaceSource: Send + Sync {
    /// Returns the interface JSON, or `None` if the unit has none.
    async fn load(&self, unit: &str) -> Result<Option<String>, ConfigurationError>;
}

/// Reads `<dir>/<Unit>.abi.json`.
#[derive(Debug, Clone)]
pub struct DirectoryInterfaceSource {
    dir: PathBuf,
}

impl DirectoryInterfaceSource {
    /// Reads `<unit>.abi.json` files from `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of a unit's interface file.
    #[must_use]
    pub fn path_for(&self, unit: &str) -> PathBuf {
        self.dir.join(format!("{unit}.abi.json"))
    }
}

#[async_trait]
impl InterfaceSource for DirectoryInterfaceSource {
    async fn load(&self, unit: &str) -> Result<Option<String>, ConfigurationError> {
        let path = self.path_for(unit);
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => Ok(Some(json)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigurationError::Load {
                message: format!("{}: {e}", path.display()),
            }),
        }
    }
}

/// Interfaces held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaceSource {
    interfaces: HashMap<String, String>,
}

impl StaticInterfaceSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the interface JSON of a unit.
    #[must_use]
    pub fn with(mut self, unit: impl Into<String>, json: impl Into<String>) -> Self {
        self.interfaces.insert(unit.into(), json.into());
        self
    }
}

#[async_trait]
impl InterfaceSource for StaticInterfaceSource {
    async fn load(&self, unit: &str) -> Result<Option<String>, ConfigurationError> {
        Ok(self.interfaces.get(unit).cloned())
    }
}

/// Loads and parses the interface of every unit concurrently.
///
/// # Errors
/// - `MissingInterface` if a unit has no interface
/// - `InvalidInterface` if an interface cannot be parsed
pub async fn load_interfaces<'a>(
    source: &dyn InterfaceSource,
    units: impl IntoIterator<Item = &'a str>,
) -> Result<BTreeMap<String, Interface>, ConfigurationError> {
    let units: Vec<&str> = units.into_iter().collect();
    let loaded = join_all(units.iter().map(|unit| source.load(unit))).await;

    let mut out = BTreeMap::new();
    for (unit, result) in units.into_iter().zip(loaded) {
        let json = result?.ok_or_else(|| ConfigurationError::MissingInterface {
            unit: unit.to_string(),
        })?;
        out.insert(unit.to_string(), Interface::from_json(unit, &json)?);
    }
    Ok(out)
}
