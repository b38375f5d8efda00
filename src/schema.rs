//! Local table schemas synthesized from remote table descriptors.
//!
//! Only tables flagged `offchainOnly` are mirrored. Each becomes a local
//! table whose value fields are translated into the store's primitive set and
//! which carries the two reserved fields `_key` and `_timestamp`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::abi::AbiType;
use crate::error::ConfigurationError;

/// Reserved field holding the id of the invocation that produced a record.
pub const KEY_FIELD: &str = "_key";

/// Reserved field holding the logical timestamp of that invocation.
pub const TIMESTAMP_FIELD: &str = "_timestamp";

/// Primitive types of the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Float,
    /// UTF-8 string.
    String,
    /// Raw bytes.
    Bytes,
}

impl PropertyType {
    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Bytes => "bytes",
        }
    }
}

/// A remote table as declared in the world configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    /// Table name (the key under which it is declared).
    #[serde(skip)]
    pub name: String,
    /// Key fields, name to remote type.
    #[serde(default)]
    pub key_schema: BTreeMap<String, String>,
    /// Value fields, name to remote type.
    #[serde(rename = "schema", alias = "valueSchema", deserialize_with = "field_schema")]
    pub value_schema: BTreeMap<String, String>,
    /// Marks the table replica-eligible.
    #[serde(default)]
    pub offchain_only: bool,
}

impl TableDescriptor {
    /// Creates an eligible descriptor with the given value fields.
    #[must_use]
    pub fn offchain<'a>(
        name: impl Into<String>,
        fields: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        Self {
            name: name.into(),
            key_schema: BTreeMap::new(),
            value_schema: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            offchain_only: true,
        }
    }
}

/// `schema` may be a field map or a single type, which names one field `value`.
fn field_schema<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FieldSchema {
        Single(String),
        Fields(BTreeMap<String, String>),
    }

    Ok(match FieldSchema::deserialize(deserializer)? {
        FieldSchema::Single(ty) => BTreeMap::from([("value".to_string(), ty)]),
        FieldSchema::Fields(fields) => fields,
    })
}

/// Central remote-to-local type translation rule.
///
/// Overrides are matched on the exact remote type string and win over the
/// default rule. Unrecognized types fall back to `String` so that no field is
/// silently dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeTranslator {
    overrides: BTreeMap<String, PropertyType>,
}

impl TypeTranslator {
    /// Creates a translator with the default rule only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an override for one remote type.
    #[must_use]
    pub fn with_override(mut self, remote: impl Into<String>, local: PropertyType) -> Self {
        self.overrides.insert(remote.into(), local);
        self
    }

    /// Creates a translator from an override map.
    #[must_use]
    pub fn from_overrides(overrides: BTreeMap<String, PropertyType>) -> Self {
        Self { overrides }
    }

    /// Translates a remote type string.
    #[must_use]
    pub fn translate(&self, remote: &str) -> PropertyType {
        if let Some(local) = self.overrides.get(remote.trim()) {
            return *local;
        }
        AbiType::parse(remote).map_or(PropertyType::String, |ty| default_property_type(&ty))
    }
}

/// Default local type for a parsed remote type.
///
/// Integers wider than 32 bits are stored as decimal strings.
#[must_use]
pub fn default_property_type(ty: &AbiType) -> PropertyType {
    match ty {
        AbiType::Bool => PropertyType::Integer,
        AbiType::Uint { bits } | AbiType::Int { bits } if *bits <= 32 => PropertyType::Integer,
        AbiType::Bytes | AbiType::FixedBytes { .. } => PropertyType::Bytes,
        _ => PropertyType::String,
    }
}

/// Schema of one local table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Fields, reserved ones included.
    pub fields: BTreeMap<String, PropertyType>,
}

impl TableSchema {
    /// Type of a field, reserved fields included.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<PropertyType> {
        self.fields.get(name).copied()
    }

    /// Value fields, reserved fields excluded.
    pub fn value_fields(&self) -> impl Iterator<Item = (&str, PropertyType)> {
        self.fields
            .iter()
            .filter(|(name, _)| !is_reserved(name))
            .map(|(name, ty)| (name.as_str(), *ty))
    }
}

/// Returns true for the engine-reserved field names.
#[must_use]
pub fn is_reserved(field: &str) -> bool {
    field == KEY_FIELD || field == TIMESTAMP_FIELD
}

/// The full set of local table schemas for one mirror instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaSet {
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaSet {
    /// Looks up a table schema.
    #[must_use]
    pub fn get(&self, table: &str) -> Option<&TableSchema> {
        self.tables.get(table)
    }

    /// Iterates over all table schemas in name order.
    pub fn iter(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Table names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Number of tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if there are no tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Stable fingerprint of the schema set.
    ///
    /// Two sets with the same tables, fields and types always produce the same
    /// fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for table in self.tables.values() {
            hasher.update(table.name.as_bytes());
            hasher.update(&[0]);
            for (field, ty) in &table.fields {
                hasher.update(field.as_bytes());
                hasher.update(&[1]);
                hasher.update(ty.type_name().as_bytes());
                hasher.update(&[2]);
            }
            hasher.update(&[3]);
        }
        hasher.finalize().to_hex().to_string()
    }
}

impl FromIterator<TableSchema> for SchemaSet {
    fn from_iter<I: IntoIterator<Item = TableSchema>>(iter: I) -> Self {
        Self {
            tables: iter.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }
}

/// Options for schema synthesis.
#[derive(Debug, Clone, Default)]
pub struct SchemaOptions {
    /// Remote to local type mapping.
    pub translator: TypeTranslator,
    /// Also add key-schema fields, typed as strings.
    pub include_key_fields: bool,
}

/// Derives local table schemas from remote table descriptors.
///
/// # Errors
/// - `NoEligibleTables` if no descriptor is flagged `offchainOnly`
/// - `ReservedField` if a descriptor declares `_key` or `_timestamp`
pub fn synthesize_schemas<'a>(
    tables: impl IntoIterator<Item = &'a TableDescriptor>,
    options: &SchemaOptions,
) -> Result<SchemaSet, ConfigurationError> {
    let mut out = BTreeMap::new();

    for table in tables.into_iter().filter(|t| t.offchain_only) {
        let mut fields = BTreeMap::new();

        if options.include_key_fields {
            for field in table.key_schema.keys() {
                fields.insert(field.clone(), PropertyType::String);
            }
        }

        for (field, remote) in &table.value_schema {
            if is_reserved(field) {
                return Err(ConfigurationError::ReservedField {
                    table: table.name.clone(),
                    field: field.clone(),
                });
            }
            fields.insert(field.clone(), options.translator.translate(remote));
        }

        fields.insert(KEY_FIELD.to_string(), PropertyType::String);
        fields.insert(TIMESTAMP_FIELD.to_string(), PropertyType::Integer);

        debug!(table = %table.name, fields = fields.len(), "synthesized table schema");
        out.insert(
            table.name.clone(),
            TableSchema {
                name: table.name.clone(),
                fields,
            },
        );
    }

    if out.is_empty() {
        return Err(ConfigurationError::NoEligibleTables);
    }

    Ok(SchemaSet { tables: out })
}
