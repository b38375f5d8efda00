//! In-memory replica store.
//!
//! Thread-safe implementation of the store traits, intended for embedded use,
//! tests, and as the reference behaviour for other backends.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::abi::Digest;
use crate::identity::SigningIdentity;
use crate::schema::SchemaSet;
use crate::store::record::{Query, Record, StoredRecord};
use crate::store::traits::{
    ActionHandler, ActionMap, ReplicaStore, StorageError, StoreOpener, TableChange,
};

/// Queued changes per subscriber before it is considered stalled and dropped.
pub const SUBSCRIPTION_CAPACITY: usize = 256;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct TableState {
    rows: BTreeMap<Digest, Record>,
    subscribers: Vec<Sender<TableChange>>,
}

impl TableState {
    fn notify(&mut self, change: &TableChange) {
        self.subscribers.retain(|tx| match tx.try_send(change.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(table = %change.table, "dropping stalled subscriber");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

pub(crate) type OpenTopics = Arc<Mutex<HashSet<String>>>;

/// Thread-safe in-memory store for one topic.
pub struct InMemoryReplica {
    topic: String,
    schemas: SchemaSet,
    identity: SigningIdentity,
    actions: ActionMap,
    tables: RwLock<HashMap<String, TableState>>,
    closed: AtomicBool,
    registry: Option<OpenTopics>,
}

impl InMemoryReplica {
    /// Creates an empty store, not tracked by any opener.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        schemas: SchemaSet,
        actions: ActionMap,
        identity: SigningIdentity,
    ) -> Self {
        let tables = schemas
            .names()
            .map(|name| (name.to_string(), TableState::default()))
            .collect();
        Self {
            topic: topic.into(),
            schemas,
            identity,
            actions,
            tables: RwLock::new(tables),
            closed: AtomicBool::new(false),
            registry: None,
        }
    }

    pub(crate) fn with_registry(mut self, registry: OpenTopics) -> Self {
        self.registry = Some(registry);
        self
    }

    pub(crate) fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed(self.topic.clone()));
        }
        Ok(())
    }

    /// Validates a record against its table schema without writing it.
    pub fn check(&self, table: &str, record: &Record) -> Result<(), StorageError> {
        let schema = self
            .schemas
            .get(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;
        record
            .validate(schema)
            .map_err(|reason| StorageError::SchemaViolation {
                table: table.to_string(),
                reason,
            })
    }

    /// Inserts a previously persisted record without notifying subscribers.
    #[cfg_attr(not(feature = "persistent"), allow(dead_code))]
    pub(crate) fn restore(&self, table: &str, key: Digest, record: Record) -> Result<(), StorageError> {
        self.check(table, &record)?;
        let mut tables = self.tables.write().map_err(|_| lock_err("replica.restore"))?;
        let state = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;
        state.rows.insert(key, record);
        Ok(())
    }

    fn release(&self) {
        if let Some(registry) = &self.registry {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.topic);
        }
    }
}

impl std::fmt::Debug for InMemoryReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryReplica")
            .field("topic", &self.topic)
            .field("tables", &self.schemas.len())
            .field("actions", &self.actions.len())
            .finish_non_exhaustive()
    }
}

impl ReplicaStore for InMemoryReplica {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn schemas(&self) -> &SchemaSet {
        &self.schemas
    }

    fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    fn action(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.actions.get(name).cloned()
    }

    fn action_names(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    fn set(&self, table: &str, key: Digest, record: Record) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.check(table, &record)?;

        let mut tables = self.tables.write().map_err(|_| lock_err("replica.set"))?;
        let state = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;

        let replaced = state.rows.insert(key, record.clone()).is_some();
        debug!(topic = %self.topic, table, %key, replaced, "record stored");

        if !state.subscribers.is_empty() {
            state.notify(&TableChange {
                table: table.to_string(),
                key,
                record,
                replaced,
            });
        }
        Ok(())
    }

    fn get(&self, table: &str, key: &Digest) -> Result<Option<Record>, StorageError> {
        self.ensure_open()?;
        let tables = self.tables.read().map_err(|_| lock_err("replica.get"))?;
        let state = tables
            .get(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;
        Ok(state.rows.get(key).cloned())
    }

    fn query(&self, table: &str, query: &Query) -> Result<Vec<StoredRecord>, StorageError> {
        self.ensure_open()?;
        let tables = self.tables.read().map_err(|_| lock_err("replica.query"))?;
        let state = tables
            .get(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;
        Ok(query.apply(&state.rows))
    }

    fn count(&self, table: &str) -> Result<usize, StorageError> {
        self.ensure_open()?;
        let tables = self.tables.read().map_err(|_| lock_err("replica.count"))?;
        tables
            .get(table)
            .map(|state| state.rows.len())
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))
    }

    fn subscribe(&self, table: &str) -> Result<Receiver<TableChange>, StorageError> {
        self.ensure_open()?;
        let mut tables = self.tables.write().map_err(|_| lock_err("replica.subscribe"))?;
        let state = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;
        let (tx, rx) = bounded(SUBSCRIPTION_CAPACITY);
        state.subscribers.push(tx);
        Ok(rx)
    }

    fn close(&self) -> Result<(), StorageError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Dropping the senders disconnects every subscriber.
        let mut tables = self.tables.write().map_err(|_| lock_err("replica.close"))?;
        for state in tables.values_mut() {
            state.subscribers.clear();
        }
        self.release();
        debug!(topic = %self.topic, "replica closed");
        Ok(())
    }
}

impl Drop for InMemoryReplica {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.release();
        }
    }
}

/// Opens in-memory replicas, allowing each topic to be open once at a time.
#[derive(Debug, Default, Clone)]
pub struct InMemoryOpener {
    open: OpenTopics,
}

impl InMemoryOpener {
    /// Creates an opener with no open topics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a replica for `topic` is currently open.
    #[must_use]
    pub fn is_open(&self, topic: &str) -> bool {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(topic)
    }
}

impl StoreOpener for InMemoryOpener {
    fn open_topic(
        &self,
        topic: &str,
        schemas: SchemaSet,
        actions: ActionMap,
        identity: SigningIdentity,
    ) -> Result<Arc<dyn ReplicaStore>, StorageError> {
        {
            let mut open = self.open.lock().map_err(|_| lock_err("opener.open_topic"))?;
            if !open.insert(topic.to_string()) {
                return Err(StorageError::TopicInUse(topic.to_string()));
            }
        }
        let replica = InMemoryReplica::new(topic, schemas, actions, identity)
            .with_registry(Arc::clone(&self.open));
        Ok(Arc::new(replica))
    }
}
