//! # worldmirror - Local replicas of remote contract state
//!
//! worldmirror derives a local, peer-replicated data layer from a remote
//! contract world. Tables the world marks `offchainOnly` become local tables;
//! the functions of its systems become local actions. Invoking an action
//! simulates the remote call and stores the result under a content digest, so
//! every peer that observes the same remote output writes the same record.
//!
//! ## Core Concepts
//!
//! - **Schema synthesis**: remote table descriptors to local table schemas
//! - **Action synthesis**: remote interfaces to one action per eligible function
//! - **Content key**: keccak-256 of the ABI encoding of a result's fields
//! - **Binding**: one instance per contract address, under topic
//!   `world.contract-<address>`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use worldmirror::{DirectoryInterfaceSource, MirrorBuilder, MirrorConfig};
//!
//! let config = MirrorConfig::from_json_file("mirror.json")?;
//! let source = Arc::new(DirectoryInterfaceSource::new("out/abi"));
//! let mirror = MirrorBuilder::new(config, source, ledger)
//!     .build("0x5FbDB2315678afecb367f032d93F642f64180aa3".parse()?)
//!     .await?;
//!
//! let ctx = mirror.context();
//! let applied = mirror
//!     .apply("sendOffchainMessage", &serde_json::json!({"message": "hi"}), &ctx)
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod abi;
pub mod actions;
pub mod address;
pub mod binder;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod identity;
pub mod ledger;
pub mod schema;
pub mod store;

pub use abi::{content_digest, AbiType, AbiValue, Digest, FunctionDescriptor, Interface, Mutability};
pub use actions::{
    load_interfaces, synthesize_actions, ActionSet, ActionSpec, DirectoryInterfaceSource,
    EligibilityRules, EligibilitySettings, InterfaceSource, StaticInterfaceSource,
};
pub use address::Address;
pub use binder::{topic_for, Mirror, MirrorBuilder, MirrorOptions, RebindError};
pub use config::{MirrorConfig, SystemDescriptor, WorldConfig};
pub use context::{BlockRef, InvocationContext};
pub use error::{ConfigurationError, InvocationError, MirrorError, MirrorResult};
pub use handler::{target_table, Applied, MirrorHandler};
pub use identity::SigningIdentity;
pub use ledger::{FixtureLedger, RemoteError, RemoteLedger, SimulateRequest, SimulateResponse};
pub use schema::{
    synthesize_schemas, PropertyType, SchemaOptions, SchemaSet, TableDescriptor, TableSchema,
    TypeTranslator,
};
pub use store::{
    InMemoryOpener, InMemoryReplica, LocalValue, Query, Record, ReplicaStore, StorageError,
    StoreOpener, StoreTable, TableChange,
};
