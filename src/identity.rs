//! Local signing identity.
//!
//! The identity authors records written by this peer. Signing and signature
//! verification belong to the replication engine; the mirror only carries the
//! identity from setup to the store.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Default chain tag, a local development chain.
pub const DEFAULT_CHAIN_ID: u64 = 31337;

/// The identity a mirror instance writes under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SigningIdentity {
    address: Address,
    chain_id: u64,
}

impl SigningIdentity {
    /// Creates an identity on the default chain.
    #[must_use]
    pub const fn new(address: Address) -> Self {
        Self {
            address,
            chain_id: DEFAULT_CHAIN_ID,
        }
    }

    /// Sets the chain id.
    #[must_use]
    pub const fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Account address.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Chain the address belongs to.
    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// CAIP-2 chain tag, e.g. `eip155:31337`.
    #[must_use]
    pub fn chain(&self) -> String {
        format!("eip155:{}", self.chain_id)
    }

    /// Decentralized identifier, e.g. `did:pkh:eip155:31337:0xab..`.
    #[must_use]
    pub fn did(&self) -> String {
        format!("did:pkh:{}:{}", self.chain(), self.address)
    }
}

impl fmt::Display for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.did())
    }
}
