//! Records, values and queries of the local store.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::abi::Digest;
use crate::schema::{PropertyType, TableSchema, KEY_FIELD, TIMESTAMP_FIELD};

/// A value in the store's primitive set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum LocalValue {
    /// Integer value.
    Integer(i64),
    /// Float value, always finite once stored.
    Float(f64),
    /// String value.
    String(String),
    /// Bytes value.
    Bytes(Vec<u8>),
}

impl LocalValue {
    /// The primitive type of this value.
    #[must_use]
    pub const fn property_type(&self) -> PropertyType {
        match self {
            Self::Integer(_) => PropertyType::Integer,
            Self::Float(_) => PropertyType::Float,
            Self::String(_) => PropertyType::String,
            Self::Bytes(_) => PropertyType::Bytes,
        }
    }

    /// The integer, if this is one.
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// The bytes, if this is one.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Plain JSON rendering: numbers, strings, and `0x` hex for bytes.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::Integer(v) => Json::from(*v),
            Self::Float(v) => Json::from(*v),
            Self::String(v) => Json::String(v.clone()),
            Self::Bytes(v) => Json::String(format!("0x{}", hex::encode(v))),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Integer(_) | Self::Float(_) => 0,
            Self::String(_) => 1,
            Self::Bytes(_) => 2,
        }
    }

    /// Total order used by queries. Numbers compare numerically across
    /// integer and float; other kinds order by kind first.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Integer(a), Self::Float(b)) => (*a as f64).total_cmp(b),
            (Self::Float(a), Self::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<i64> for LocalValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for LocalValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for LocalValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for LocalValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<u8>> for LocalValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

/// A record of a local table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, LocalValue>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, returning the record for chaining.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<LocalValue>) -> Self {
        self.insert(field, value);
        self
    }

    /// Sets a field.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<LocalValue>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Value of a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&LocalValue> {
        self.fields.get(field)
    }

    /// The `_key` field: id of the invocation that wrote the record.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.get(KEY_FIELD).and_then(LocalValue::as_str)
    }

    /// The `_timestamp` field.
    #[must_use]
    pub fn timestamp(&self) -> Option<i64> {
        self.get(TIMESTAMP_FIELD).and_then(LocalValue::as_integer)
    }

    /// All fields, reserved fields included.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &LocalValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Plain JSON object rendering.
    #[must_use]
    pub fn to_json(&self) -> Json {
        let map: Map<String, Json> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Json::Object(map)
    }

    /// Checks the record against a table schema.
    ///
    /// Every field must be declared with a matching type and both reserved
    /// fields must be present. Floats must be finite.
    pub fn validate(&self, schema: &TableSchema) -> Result<(), String> {
        for (field, value) in &self.fields {
            match schema.field(field) {
                None => return Err(format!("unknown field '{field}'")),
                Some(expected) if expected != value.property_type() => {
                    return Err(format!(
                        "field '{field}' expects {}, got {}",
                        expected.type_name(),
                        value.property_type().type_name()
                    ));
                }
                Some(_) => {}
            }
            if let LocalValue::Float(v) = value {
                if !v.is_finite() {
                    return Err(format!("field '{field}' holds non-finite float {v}"));
                }
            }
        }
        for reserved in [KEY_FIELD, TIMESTAMP_FIELD] {
            if !self.fields.contains_key(reserved) {
                return Err(format!("missing reserved field '{reserved}'"));
            }
        }
        Ok(())
    }
}

/// A record together with the key it is stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Content digest.
    pub key: Digest,
    /// Stored record.
    pub record: Record,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// Filter, order and limit options for table queries.
///
/// Without an explicit order, results are ordered by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filters: Vec<(String, LocalValue)>,
    order_by: Option<(String, Order)>,
    limit: Option<usize>,
}

impl Query {
    /// Matches every record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps records whose `field` equals `value`.
    #[must_use]
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<LocalValue>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    /// Orders results by `field`.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, order: Order) -> Self {
        self.order_by = Some((field.into(), order));
        self
    }

    /// Keeps at most `limit` results.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if the record passes every filter.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.filters
            .iter()
            .all(|(field, value)| record.get(field) == Some(value))
    }

    /// Applies filters, ordering and limit to `(key, record)` pairs.
    pub fn apply<'a>(
        &self,
        rows: impl IntoIterator<Item = (&'a Digest, &'a Record)>,
    ) -> Vec<StoredRecord> {
        let mut out: Vec<StoredRecord> = rows
            .into_iter()
            .filter(|(_, record)| self.matches(record))
            .map(|(key, record)| StoredRecord {
                key: *key,
                record: record.clone(),
            })
            .collect();

        match &self.order_by {
            Some((field, order)) => {
                out.sort_by(|a, b| {
                    let ord = match (a.record.get(field), b.record.get(field)) {
                        (Some(x), Some(y)) => x.total_cmp(y),
                        (Some(_), None) => Ordering::Less,
                        (None, Some(_)) => Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    }
                    .then_with(|| a.key.cmp(&b.key));
                    match order {
                        Order::Asc => ord,
                        Order::Desc => ord.reverse(),
                    }
                });
            }
            None => out.sort_by(|a, b| a.key.cmp(&b.key)),
        }

        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}
