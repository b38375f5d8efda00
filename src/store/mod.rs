//! Local replica store.
//!
//! A store is opened per topic with the synthesized schemas, the synthesized
//! actions and the local signing identity. Writes are create-or-replace by
//! content key.

mod memory;
mod record;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::{InMemoryOpener, InMemoryReplica, SUBSCRIPTION_CAPACITY};
pub use record::{LocalValue, Order, Query, Record, StoredRecord};
pub use traits::{
    ActionHandler, ActionMap, ReplicaStore, StorageError, StoreOpener, StoreTable, TableChange,
};
