//! Log-backed replica store.
//!
//! Each topic lives in its own directory under the opener's root:
//!
//! ```text
//! <root>/<sanitized topic>/
//!   manifest.json   topic, schema fingerprint, identity
//!   records.log     append-only record log
//! ```
//!
//! Reopening a topic replays its log. A directory whose manifest names a
//! different topic or schema fingerprint is refused, as is a log with a
//! corrupt frame.

mod codec;
mod log;

pub use log::{LogEntry, LogGuard, RecordLog};

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::abi::Digest;
use crate::identity::SigningIdentity;
use crate::schema::{SchemaSet, TableSchema};
use crate::store::memory::{InMemoryReplica, OpenTopics};
use crate::store::record::{Query, Record, StoredRecord};
use crate::store::traits::{
    ActionHandler, ActionMap, ReplicaStore, StorageError, StoreOpener, TableChange,
};

const MANIFEST_FILE: &str = "manifest.json";
const LOG_FILE: &str = "records.log";

fn io_err(context: &str, e: impl std::fmt::Display) -> StorageError {
    StorageError::BackendError(format!("{context}: {e}"))
}

/// Maps a topic to a directory name.
#[must_use]
pub fn sanitize_topic(topic: &str) -> String {
    topic
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Manifest {
    topic: String,
    fingerprint: String,
    identity: SigningIdentity,
    tables: Vec<TableSchema>,
}

impl Manifest {
    fn load_or_create(dir: &Path, expected: &Self) -> Result<(), StorageError> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            let json = serde_json::to_vec_pretty(expected)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;
            let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
            fs::write(&tmp, json).map_err(|e| io_err("write manifest", e))?;
            fs::rename(&tmp, &path).map_err(|e| io_err("write manifest", e))?;
            return Ok(());
        }

        let bytes = fs::read(&path).map_err(|e| io_err("read manifest", e))?;
        let stored: Self = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        if stored.topic != expected.topic {
            return Err(StorageError::TopicMismatch(format!(
                "directory holds topic '{}', not '{}'",
                stored.topic, expected.topic
            )));
        }
        if stored.fingerprint != expected.fingerprint {
            return Err(StorageError::TopicMismatch(format!(
                "topic '{}' was created with a different schema set",
                expected.topic
            )));
        }
        Ok(())
    }
}

/// A replica whose writes are appended to a log before they are applied.
pub struct LogReplica {
    inner: InMemoryReplica,
    log: RecordLog,
    dir: PathBuf,
    author: String,
}

impl LogReplica {
    /// Directory holding this replica's files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sequence number of the last logged write.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.log.sequence()
    }
}

impl std::fmt::Debug for LogReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogReplica")
            .field("topic", &self.inner.topic())
            .field("log", &self.log.path())
            .field("sequence", &self.log.sequence())
            .finish_non_exhaustive()
    }
}

impl ReplicaStore for LogReplica {
    fn topic(&self) -> &str {
        self.inner.topic()
    }

    fn schemas(&self) -> &SchemaSet {
        self.inner.schemas()
    }

    fn identity(&self) -> &SigningIdentity {
        self.inner.identity()
    }

    fn action(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.inner.action(name)
    }

    fn action_names(&self) -> Vec<String> {
        self.inner.action_names()
    }

    fn set(&self, table: &str, key: Digest, record: Record) -> Result<(), StorageError> {
        self.inner.ensure_open()?;
        self.inner.check(table, &record)?;
        // Held until the write is applied, so replay order matches memory.
        let mut writer = self.log.lock();
        writer
            .append(table, key, &record, &self.author)
            .map_err(|e| io_err("append to log", e))?;
        self.inner.set(table, key, record)
    }

    fn get(&self, table: &str, key: &Digest) -> Result<Option<Record>, StorageError> {
        self.inner.get(table, key)
    }

    fn query(&self, table: &str, query: &Query) -> Result<Vec<StoredRecord>, StorageError> {
        self.inner.query(table, query)
    }

    fn count(&self, table: &str) -> Result<usize, StorageError> {
        self.inner.count(table)
    }

    fn subscribe(&self, table: &str) -> Result<Receiver<TableChange>, StorageError> {
        self.inner.subscribe(table)
    }

    fn close(&self) -> Result<(), StorageError> {
        self.inner.close()
    }
}

/// Opens log-backed replicas under a root directory.
#[derive(Debug, Clone)]
pub struct LogOpener {
    root: PathBuf,
    sync_on_write: bool,
    open: OpenTopics,
}

impl LogOpener {
    /// Opens topics under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sync_on_write: true,
            open: OpenTopics::default(),
        }
    }

    /// Whether each append is synced to disk before `set` returns.
    #[must_use]
    pub const fn with_sync_on_write(mut self, sync_on_write: bool) -> Self {
        self.sync_on_write = sync_on_write;
        self
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Opens a topic and returns the concrete replica.
    pub fn open_log(
        &self,
        topic: &str,
        schemas: SchemaSet,
        actions: ActionMap,
        identity: SigningIdentity,
    ) -> Result<LogReplica, StorageError> {
        {
            let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
            if !open.insert(topic.to_string()) {
                return Err(StorageError::TopicInUse(topic.to_string()));
            }
        }

        let result = self.open_registered(topic, schemas, actions, identity);
        if result.is_err() {
            self.open
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(topic);
        }
        result
    }

    fn open_registered(
        &self,
        topic: &str,
        schemas: SchemaSet,
        actions: ActionMap,
        identity: SigningIdentity,
    ) -> Result<LogReplica, StorageError> {
        let dir = self.root.join(sanitize_topic(topic));
        fs::create_dir_all(&dir).map_err(|e| io_err("create topic directory", e))?;

        Manifest::load_or_create(
            &dir,
            &Manifest {
                topic: topic.to_string(),
                fingerprint: schemas.fingerprint(),
                identity: identity.clone(),
                tables: schemas.iter().cloned().collect(),
            },
        )?;

        let log_path = dir.join(LOG_FILE);
        let (log, entries) =
            RecordLog::open(&log_path, self.sync_on_write).map_err(|e| match e.kind() {
                ErrorKind::InvalidData => {
                    StorageError::Corrupted(format!("{}: {e}", log_path.display()))
                }
                _ => io_err("open log", e),
            })?;

        let author = identity.did();
        let inner = InMemoryReplica::new(topic, schemas, actions, identity);
        let replayed = entries.len();
        for entry in entries {
            inner.restore(&entry.table, entry.key, entry.record)?;
        }
        info!(topic, dir = %dir.display(), replayed, "opened log replica");

        Ok(LogReplica {
            inner: inner.with_registry(Arc::clone(&self.open)),
            log,
            dir,
            author,
        })
    }
}

impl StoreOpener for LogOpener {
    fn open_topic(
        &self,
        topic: &str,
        schemas: SchemaSet,
        actions: ActionMap,
        identity: SigningIdentity,
    ) -> Result<Arc<dyn ReplicaStore>, StorageError> {
        Ok(Arc::new(self.open_log(topic, schemas, actions, identity)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::content_digest;
    use crate::address::Address;
    use crate::schema::{
        synthesize_schemas, PropertyType, SchemaOptions, TableDescriptor, TypeTranslator,
        KEY_FIELD, TIMESTAMP_FIELD,
    };
    use std::collections::BTreeMap;
    use std::thread;
    use tempfile::tempdir;

    fn schemas(message_type: &str) -> SchemaSet {
        let messages = TableDescriptor::offchain("Messages", [("message", message_type)]);
        synthesize_schemas([&messages], &SchemaOptions::default()).unwrap()
    }

    fn identity() -> SigningIdentity {
        SigningIdentity::new(Address::from_bytes([7; 20]))
    }

    fn record(message: &str) -> Record {
        Record::new()
            .with("message", message)
            .with(KEY_FIELD, "inv")
            .with(TIMESTAMP_FIELD, 1i64)
    }

    #[test]
    fn test_sanitize_topic() {
        assert_eq!(sanitize_topic("world.contract-0xab"), "world.contract-0xab");
        assert_eq!(sanitize_topic("a/b c"), "a_b_c");
    }

    #[test]
    fn test_reopen_replays_records() {
        let dir = tempdir().unwrap();
        let opener = LogOpener::new(dir.path()).with_sync_on_write(false);
        let key = content_digest(b"k");

        {
            let replica = opener
                .open_log("t", schemas("string"), ActionMap::new(), identity())
                .unwrap();
            replica.set("Messages", key, record("a")).unwrap();
            replica.set("Messages", key, record("b")).unwrap();
            assert_eq!(replica.sequence(), 2);
            replica.close().unwrap();
        }

        let replica = opener
            .open_log("t", schemas("string"), ActionMap::new(), identity())
            .unwrap();
        assert_eq!(replica.count("Messages").unwrap(), 1);
        assert_eq!(replica.get("Messages", &key).unwrap(), Some(record("b")));
    }

    #[test]
    fn test_rejected_writes_are_not_logged() {
        let dir = tempdir().unwrap();
        let opener = LogOpener::new(dir.path()).with_sync_on_write(false);
        let replica = opener
            .open_log("t", schemas("string"), ActionMap::new(), identity())
            .unwrap();
        let bad = record("a").with("extra", 1i64);
        assert!(replica.set("Messages", content_digest(b"k"), bad).is_err());
        assert_eq!(replica.sequence(), 0);
    }

    #[test]
    fn test_schema_change_is_a_mismatch() {
        let dir = tempdir().unwrap();
        let opener = LogOpener::new(dir.path()).with_sync_on_write(false);
        drop(
            opener
                .open_log("t", schemas("string"), ActionMap::new(), identity())
                .unwrap(),
        );

        let err = opener
            .open_log("t", schemas("bytes"), ActionMap::new(), identity())
            .unwrap_err();
        assert!(matches!(err, StorageError::TopicMismatch(_)));

        // A failed open does not leave the topic marked as in use.
        assert!(opener
            .open_log("t", schemas("string"), ActionMap::new(), identity())
            .is_ok());
    }

    #[test]
    fn test_non_finite_floats_are_never_logged() {
        let scores = TableDescriptor::offchain("Scores", [("score", "uint64")]);
        let options = SchemaOptions {
            translator: TypeTranslator::from_overrides(BTreeMap::from([(
                "uint64".to_string(),
                PropertyType::Float,
            )])),
            ..SchemaOptions::default()
        };
        let schemas = synthesize_schemas([&scores], &options).unwrap();
        let score = |v: f64| {
            Record::new()
                .with("score", v)
                .with(KEY_FIELD, "inv")
                .with(TIMESTAMP_FIELD, 1i64)
        };

        let dir = tempdir().unwrap();
        let opener = LogOpener::new(dir.path()).with_sync_on_write(false);
        {
            let replica = opener
                .open_log("t", schemas.clone(), ActionMap::new(), identity())
                .unwrap();
            replica.set("Scores", content_digest(b"a"), score(1.0)).unwrap();
            assert!(matches!(
                replica.set("Scores", content_digest(b"b"), score(f64::NAN)),
                Err(StorageError::SchemaViolation { .. })
            ));
            replica.set("Scores", content_digest(b"c"), score(2.0)).unwrap();
            assert_eq!(replica.sequence(), 2);
        }

        let replica = opener
            .open_log("t", schemas, ActionMap::new(), identity())
            .unwrap();
        assert_eq!(replica.count("Scores").unwrap(), 2);
    }

    #[test]
    fn test_corrupt_log_is_refused_and_left_intact() {
        let dir = tempdir().unwrap();
        let opener = LogOpener::new(dir.path()).with_sync_on_write(false);
        let replica = opener
            .open_log("t", schemas("string"), ActionMap::new(), identity())
            .unwrap();
        replica.set("Messages", content_digest(b"a"), record("a")).unwrap();
        replica.set("Messages", content_digest(b"b"), record("b")).unwrap();
        let log_path = replica.dir().join(LOG_FILE);
        drop(replica);

        let mut bytes = fs::read(&log_path).unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xFF;
        fs::write(&log_path, &bytes).unwrap();

        let err = opener
            .open_log("t", schemas("string"), ActionMap::new(), identity())
            .unwrap_err();
        assert!(matches!(err, StorageError::Corrupted(_)), "{err}");
        assert_eq!(fs::read(&log_path).unwrap(), bytes);

        // The failed open released the topic.
        assert!(matches!(
            opener.open_log("t", schemas("string"), ActionMap::new(), identity()),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn test_concurrent_writes_replay_to_the_live_state() {
        let dir = tempdir().unwrap();
        let opener = LogOpener::new(dir.path()).with_sync_on_write(false);
        let key = content_digest(b"same content");

        let replica = opener
            .open_log("t", schemas("string"), ActionMap::new(), identity())
            .unwrap();
        thread::scope(|scope| {
            for writer in 0..4 {
                let replica = &replica;
                scope.spawn(move || {
                    for i in 0..50i64 {
                        let rec = record("gm")
                            .with(KEY_FIELD, format!("w{writer}-{i}"))
                            .with(TIMESTAMP_FIELD, i);
                        replica.set("Messages", key, rec).unwrap();
                    }
                });
            }
        });
        assert_eq!(replica.sequence(), 200);
        let live = replica.get("Messages", &key).unwrap();
        assert!(live.is_some());
        drop(replica);

        let reopened = opener
            .open_log("t", schemas("string"), ActionMap::new(), identity())
            .unwrap();
        assert_eq!(reopened.get("Messages", &key).unwrap(), live);
    }

    #[test]
    fn test_topic_is_exclusive_while_open() {
        let dir = tempdir().unwrap();
        let opener = LogOpener::new(dir.path()).with_sync_on_write(false);
        let _first = opener
            .open_topic("t", schemas("string"), ActionMap::new(), identity())
            .unwrap();
        assert!(matches!(
            opener.open_topic("t", schemas("string"), ActionMap::new(), identity()),
            Err(StorageError::TopicInUse(_))
        ));
    }
}
