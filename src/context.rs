//! Invocation context supplied with every action invocation.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::Address;
use crate::identity::SigningIdentity;

/// Reference to a remote block, used to pin the state a simulation runs
/// against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BlockRef {
    /// Block height.
    Number(u64),
    /// Block hash, `0x`-prefixed.
    Hash(String),
}

/// Context of one action invocation. Read-only to the handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationContext {
    /// Invocation identifier, stored as the record's `_key`.
    pub id: String,
    /// Chain or namespace tag.
    pub chain: String,
    /// Calling identity, used as the simulation caller.
    pub address: Address,
    /// Optional block reference.
    pub block: Option<BlockRef>,
    /// Logical timestamp in milliseconds, stored as `_timestamp`.
    pub timestamp: i64,
}

impl InvocationContext {
    /// Creates a context with a fresh id and the current wall-clock time.
    #[must_use]
    pub fn new(identity: &SigningIdentity) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chain: identity.chain(),
            address: identity.address(),
            block: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Replaces the invocation id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Replaces the timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Pins the simulation to a block.
    #[must_use]
    pub fn with_block(mut self, block: BlockRef) -> Self {
        self.block = Some(block);
        self
    }
}
