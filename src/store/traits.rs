//! Abstract local store traits.
//!
//! The local store is the replication engine's per-topic namespace. These
//! traits define the contract the mirror relies on:
//! - In-memory backends for tests and embedded use
//! - Log-backed backends for durable local replicas
//! - Adapters to a real peer-to-peer replication engine

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use crossbeam_channel::Receiver;
use serde_json::Value as Json;
use thiserror::Error;

use crate::abi::Digest;
use crate::context::InvocationContext;
use crate::error::MirrorResult;
use crate::handler::Applied;
use crate::identity::SigningIdentity;
use crate::schema::SchemaSet;
use crate::store::record::{Query, Record, StoredRecord};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Table is not part of the opened schema set.
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Record does not conform to its table schema.
    #[error("Schema violation in table '{table}': {reason}")]
    SchemaViolation {
        /// Table written.
        table: String,
        /// What did not conform.
        reason: String,
    },

    /// Topic is already open elsewhere.
    #[error("Topic already open: {0}")]
    TopicInUse(String),

    /// Stored data belongs to another topic or schema set.
    #[error("Topic mismatch: {0}")]
    TopicMismatch(String),

    /// Store was closed.
    #[error("Store closed: {0}")]
    Closed(String),

    /// Persisted data failed its integrity checks.
    #[error("Corrupted storage: {0}")]
    Corrupted(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// A change to a table, delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct TableChange {
    /// Table changed.
    pub table: String,
    /// Key of the changed record.
    pub key: Digest,
    /// Record as stored.
    pub record: Record,
    /// True if a record already existed under the key.
    pub replaced: bool,
}

/// An action implementation registered with a topic.
///
/// Handlers receive the store they were registered with, the raw action
/// arguments and the invocation context.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Runs the action against `db`.
    async fn apply(
        &self,
        db: &dyn ReplicaStore,
        args: &Json,
        ctx: &InvocationContext,
    ) -> MirrorResult<Applied>;
}

/// Actions registered with a topic, by name.
pub type ActionMap = BTreeMap<String, Arc<dyn ActionHandler>>;

/// A store opened for one topic.
///
/// # Safety Considerations
/// - `set` is the only mutation and must be atomic per call
/// - Implementations should handle concurrent access safely
pub trait ReplicaStore: Send + Sync {
    /// Topic this store was opened for.
    fn topic(&self) -> &str;

    /// Schemas this store was opened with.
    fn schemas(&self) -> &SchemaSet;

    /// Identity local writes are authored by.
    fn identity(&self) -> &SigningIdentity;

    /// Looks up a registered action.
    fn action(&self, name: &str) -> Option<Arc<dyn ActionHandler>>;

    /// Names of all registered actions.
    fn action_names(&self) -> Vec<String>;

    /// Create-or-replace a record under `key`.
    fn set(&self, table: &str, key: Digest, record: Record) -> Result<(), StorageError>;

    /// Get a record by key.
    fn get(&self, table: &str, key: &Digest) -> Result<Option<Record>, StorageError>;

    /// Query a table.
    fn query(&self, table: &str, query: &Query) -> Result<Vec<StoredRecord>, StorageError>;

    /// Number of records in a table.
    fn count(&self, table: &str) -> Result<usize, StorageError>;

    /// Subscribe to changes of a table.
    fn subscribe(&self, table: &str) -> Result<Receiver<TableChange>, StorageError>;

    /// Close the store. Further calls fail with `Closed`.
    fn close(&self) -> Result<(), StorageError>;
}

/// Opens stores for topics.
pub trait StoreOpener: Send + Sync {
    /// Opens the store for `topic`. Fails if it is already open.
    fn open_topic(
        &self,
        topic: &str,
        schemas: SchemaSet,
        actions: ActionMap,
        identity: SigningIdentity,
    ) -> Result<Arc<dyn ReplicaStore>, StorageError>;
}

/// A borrowed view of one table.
#[derive(Clone, Copy)]
pub struct StoreTable<'a> {
    store: &'a dyn ReplicaStore,
    name: &'a str,
}

impl<'a> StoreTable<'a> {
    /// Creates a view, failing if the table is not part of the store's schemas.
    pub fn new(store: &'a dyn ReplicaStore, name: &'a str) -> Result<Self, StorageError> {
        if store.schemas().get(name).is_none() {
            return Err(StorageError::UnknownTable(name.to_string()));
        }
        Ok(Self { store, name })
    }

    /// Table name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name
    }

    /// Creates or replaces a record.
    pub fn set(&self, key: Digest, record: Record) -> Result<(), StorageError> {
        self.store.set(self.name, key, record)
    }

    /// Record under `key`.
    pub fn get(&self, key: &Digest) -> Result<Option<Record>, StorageError> {
        self.store.get(self.name, key)
    }

    /// Runs a query.
    pub fn query(&self, query: &Query) -> Result<Vec<StoredRecord>, StorageError> {
        self.store.query(self.name, query)
    }

    /// Number of records.
    pub fn count(&self) -> Result<usize, StorageError> {
        self.store.count(self.name)
    }

    /// Subscribes to changes.
    pub fn subscribe(&self) -> Result<Receiver<TableChange>, StorageError> {
        self.store.subscribe(self.name)
    }
}

impl std::fmt::Debug for StoreTable<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTable")
            .field("topic", &self.store.topic())
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_replica_store_object_safe(_: &dyn ReplicaStore) {}
    fn _assert_store_opener_object_safe(_: &dyn StoreOpener) {}
    fn _assert_action_handler_object_safe(_: &dyn ActionHandler) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::UnknownTable("Messages".to_string());
        assert!(err.to_string().contains("Unknown table"));

        let err = StorageError::SchemaViolation {
            table: "Messages".to_string(),
            reason: "unknown field 'x'".to_string(),
        };
        assert!(err.to_string().contains("unknown field"));
    }
}
