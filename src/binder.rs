//! Scope and identity binding.
//!
//! A [`Mirror`] binds synthesized schemas and actions to one remote contract
//! address and one signing identity, and owns the store opened for the
//! derived topic. Changing the contract address means building a new
//! instance with [`Mirror::rebind`]; the old topic's store is closed once the
//! new one is open.

use std::fmt;
use std::sync::Arc;

use serde_json::Value as Json;
use thiserror::Error;
use tracing::{info, warn};

use crate::actions::{load_interfaces, synthesize_actions, ActionSet, InterfaceSource};
use crate::address::Address;
use crate::config::MirrorConfig;
use crate::context::InvocationContext;
use crate::error::{InvocationError, MirrorError, MirrorResult};
use crate::handler::{Applied, MirrorHandler, RemoteScope};
use crate::identity::SigningIdentity;
use crate::ledger::RemoteLedger;
use crate::schema::{synthesize_schemas, SchemaSet};
use crate::store::{ActionHandler, ActionMap, InMemoryOpener, ReplicaStore, StoreOpener, StoreTable};

/// Topic prefix shared by all mirror instances.
pub const TOPIC_PREFIX: &str = "world.contract-";

/// Topic a contract's replica lives under.
#[must_use]
pub fn topic_for(contract: Address) -> String {
    format!("{TOPIC_PREFIX}{}", contract.to_hex())
}

/// Everything needed to bind a mirror instance.
pub struct MirrorOptions {
    /// Contract to bind to.
    pub contract: Address,
    /// Identity invocations run as.
    pub identity: SigningIdentity,
    /// Ledger simulations run on.
    pub ledger: Arc<dyn RemoteLedger>,
    /// Synthesized tables.
    pub schemas: SchemaSet,
    /// Synthesized actions.
    pub actions: ActionSet,
    /// Opener for the topic's store.
    pub opener: Arc<dyn StoreOpener>,
}

/// A bound mirror instance.
pub struct Mirror {
    topic: String,
    contract: Address,
    identity: SigningIdentity,
    ledger: Arc<dyn RemoteLedger>,
    schemas: SchemaSet,
    actions: ActionSet,
    opener: Arc<dyn StoreOpener>,
    store: Arc<dyn ReplicaStore>,
}

impl Mirror {
    /// Derives the topic, builds one handler per action and opens the store.
    pub fn bind(options: MirrorOptions) -> MirrorResult<Self> {
        let MirrorOptions {
            contract,
            identity,
            ledger,
            schemas,
            actions,
            opener,
        } = options;

        let topic = topic_for(contract);
        let scope = Arc::new(RemoteScope {
            ledger: Arc::clone(&ledger),
            contract,
        });
        let handlers: ActionMap = actions
            .iter()
            .map(|spec| {
                let handler: Arc<dyn ActionHandler> = Arc::new(MirrorHandler::new(
                    Arc::clone(&spec.function),
                    Arc::clone(&scope),
                ));
                (spec.name.clone(), handler)
            })
            .collect();

        let store = opener.open_topic(&topic, schemas.clone(), handlers, identity.clone())?;
        info!(
            topic = %topic,
            identity = %identity,
            tables = schemas.len(),
            actions = actions.len(),
            "mirror bound"
        );

        Ok(Self {
            topic,
            contract,
            identity,
            ledger,
            schemas,
            actions,
            opener,
            store,
        })
    }

    /// Topic of the bound store.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Bound contract address.
    #[must_use]
    pub const fn contract(&self) -> Address {
        self.contract
    }

    /// Bound signing identity.
    #[must_use]
    pub const fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    /// Synthesized table schemas.
    #[must_use]
    pub const fn schemas(&self) -> &SchemaSet {
        &self.schemas
    }

    /// Synthesized actions.
    #[must_use]
    pub const fn actions(&self) -> &ActionSet {
        &self.actions
    }

    /// The store opened for this instance's topic.
    #[must_use]
    pub fn store(&self) -> &dyn ReplicaStore {
        self.store.as_ref()
    }

    /// A fresh invocation context for this instance's identity.
    #[must_use]
    pub fn context(&self) -> InvocationContext {
        InvocationContext::new(&self.identity)
    }

    /// Invokes an action by name.
    pub async fn apply(
        &self,
        name: &str,
        args: &Json,
        ctx: &InvocationContext,
    ) -> MirrorResult<Applied> {
        let handler = self
            .store
            .action(name)
            .ok_or_else(|| InvocationError::UnknownAction {
                name: name.to_string(),
            })?;
        handler.apply(self.store.as_ref(), args, ctx).await
    }

    /// A view of one local table.
    pub fn table<'a>(&'a self, name: &'a str) -> MirrorResult<StoreTable<'a>> {
        Ok(StoreTable::new(self.store.as_ref(), name)?)
    }

    /// Closes the store.
    pub fn close(&self) -> MirrorResult<()> {
        self.store.close()?;
        info!(topic = %self.topic, "mirror closed");
        Ok(())
    }

    /// Binds a new instance to `contract`, then closes this one.
    ///
    /// If the new binding fails, this instance is handed back in the error,
    /// unchanged and still open. Rebinding to the bound contract is a no-op.
    pub fn rebind(self, contract: Address) -> Result<Self, RebindError> {
        if contract == self.contract {
            return Ok(self);
        }
        let bound = Self::bind(MirrorOptions {
            contract,
            identity: self.identity.clone(),
            ledger: Arc::clone(&self.ledger),
            schemas: self.schemas.clone(),
            actions: self.actions.clone(),
            opener: Arc::clone(&self.opener),
        });
        match bound {
            Ok(next) => {
                if let Err(e) = self.close() {
                    warn!(
                        topic = %self.topic,
                        error = %e,
                        "previous topic did not close cleanly, releasing on drop"
                    );
                }
                Ok(next)
            }
            Err(source) => Err(RebindError {
                mirror: Box::new(self),
                source,
            }),
        }
    }
}

/// A failed [`Mirror::rebind`], holding the instance it was called on.
#[derive(Debug, Error)]
#[error("Rebind failed: {source}")]
pub struct RebindError {
    /// The original instance, still bound and open.
    pub mirror: Box<Mirror>,
    /// Why the new binding failed.
    #[source]
    pub source: MirrorError,
}

impl RebindError {
    /// Takes back the original instance.
    #[must_use]
    pub fn into_mirror(self) -> Mirror {
        *self.mirror
    }
}

impl fmt::Debug for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mirror")
            .field("topic", &self.topic)
            .field("identity", &self.identity)
            .field("tables", &self.schemas.len())
            .field("actions", &self.actions.len())
            .finish_non_exhaustive()
    }
}

/// Builds a mirror from configuration.
///
/// # Example
/// ```rust,ignore
/// let mirror = MirrorBuilder::new(config, Arc::new(source), ledger)
///     .identity(SigningIdentity::new(me))
///     .build(world_address)
///     .await?;
/// ```
pub struct MirrorBuilder {
    config: MirrorConfig,
    source: Arc<dyn InterfaceSource>,
    ledger: Arc<dyn RemoteLedger>,
    identity: SigningIdentity,
    opener: Arc<dyn StoreOpener>,
}

impl MirrorBuilder {
    /// Starts a builder with a zero-address identity and an in-memory store.
    #[must_use]
    pub fn new(
        config: MirrorConfig,
        source: Arc<dyn InterfaceSource>,
        ledger: Arc<dyn RemoteLedger>,
    ) -> Self {
        Self {
            config,
            source,
            ledger,
            identity: SigningIdentity::new(Address::zero()),
            opener: Arc::new(InMemoryOpener::new()),
        }
    }

    /// Sets the signing identity.
    #[must_use]
    pub fn identity(mut self, identity: SigningIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Sets the store opener.
    #[must_use]
    pub fn opener(mut self, opener: Arc<dyn StoreOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// Synthesizes schemas and actions, then binds to `contract`.
    ///
    /// Any configuration error aborts before a store is opened.
    pub async fn build(self, contract: Address) -> MirrorResult<Mirror> {
        let schemas = synthesize_schemas(
            self.config.world.tables.values(),
            &self.config.schema_options(),
        )?;
        let rules = self.config.eligibility_rules()?;
        let units: Vec<String> = self.config.world.units().map(str::to_string).collect();
        let interfaces =
            load_interfaces(self.source.as_ref(), units.iter().map(String::as_str)).await?;
        let actions = synthesize_actions(&interfaces, &rules)?;
        info!(
            tables = schemas.len(),
            units = interfaces.len(),
            actions = actions.len(),
            fingerprint = %schemas.fingerprint(),
            "synthesized mirror"
        );

        Mirror::bind(MirrorOptions {
            contract,
            identity: self.identity,
            ledger: self.ledger,
            schemas,
            actions,
            opener: self.opener,
        })
    }
}

impl fmt::Debug for MirrorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorBuilder")
            .field("config", &self.config)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_uses_lowercase_address() {
        let contract: Address = "0xAbCdEf0123456789aBCdef0123456789abcdEF01".parse().unwrap();
        assert_eq!(
            topic_for(contract),
            "world.contract-0xabcdef0123456789abcdef0123456789abcdef01"
        );
    }
}
