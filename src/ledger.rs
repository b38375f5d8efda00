//! Remote ledger seam.
//!
//! The remote ledger is the authoritative contract environment. The mirror
//! only ever asks it to *simulate* a call, which previews the result without
//! changing remote state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value as Json;
use thiserror::Error;

use crate::abi::{encode, AbiValue, EncodeError, FunctionDescriptor};
use crate::address::Address;
use crate::context::BlockRef;

/// Failure of a remote simulation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The call reverted on the remote ledger.
    #[error("execution reverted: {reason}")]
    Reverted {
        /// Revert reason.
        reason: String,
    },

    /// The ledger could not be reached or answered garbage.
    #[error("transport failure: {message}")]
    Transport {
        /// Transport failure.
        message: String,
    },
}

impl RemoteError {
    /// Returns true if the failure was in transport, not execution.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// A simulate request.
#[derive(Debug, Clone, Copy)]
pub struct SimulateRequest<'a> {
    /// Caller identity (the invocation's address).
    pub caller: Address,
    /// Contract bound at setup.
    pub contract: Address,
    /// Function being simulated.
    pub function: &'a FunctionDescriptor,
    /// Positional arguments in declared input order.
    pub args: &'a [AbiValue],
    /// Block to run against, if the invocation pinned one.
    pub block: Option<&'a BlockRef>,
}

impl SimulateRequest<'_> {
    /// Call data: 4-byte selector followed by the encoded arguments.
    pub fn calldata(&self) -> Result<Vec<u8>, EncodeError> {
        let mut out = self.function.selector().to_vec();
        out.extend(encode(&self.function.input_types(), self.args)?);
        Ok(out)
    }
}

/// A successful simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulateResponse {
    /// Structured result: an object keyed by output component name, or a
    /// positional array.
    pub result: Json,
}

/// The remote ledger's simulate operation.
#[async_trait]
pub trait RemoteLedger: Send + Sync {
    /// Simulates a call. Must not change remote state.
    async fn simulate(&self, request: SimulateRequest<'_>) -> Result<SimulateResponse, RemoteError>;
}

type Responder = Arc<dyn Fn(&SimulateRequest<'_>) -> Result<Json, RemoteError> + Send + Sync>;

/// A call observed by [`FixtureLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Caller address.
    pub caller: Address,
    /// Contract called.
    pub contract: Address,
    /// Function name.
    pub function: String,
    /// Positional arguments.
    pub args: Vec<AbiValue>,
    /// Pinned block, if any.
    pub block: Option<BlockRef>,
}

/// In-memory ledger with scripted responses per function.
///
/// Intended for tests and offline runs. Functions without a script revert.
#[derive(Default)]
pub struct FixtureLedger {
    responders: Mutex<HashMap<String, Responder>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FixtureLedger {
    /// Creates a ledger with no scripted functions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Always returns `result` for `function`.
    pub fn respond(&self, function: impl Into<String>, result: Json) {
        self.respond_with(function, move |_| Ok(result.clone()));
    }

    /// Always fails `function` with `error`.
    pub fn fail(&self, function: impl Into<String>, error: RemoteError) {
        self.respond_with(function, move |_| Err(error.clone()));
    }

    /// Computes the response for `function` from the request.
    pub fn respond_with<F>(&self, function: impl Into<String>, responder: F)
    where
        F: Fn(&SimulateRequest<'_>) -> Result<Json, RemoteError> + Send + Sync + 'static,
    {
        self.responders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(function.into(), Arc::new(responder));
    }

    /// Calls observed so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of calls observed so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl std::fmt::Debug for FixtureLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureLedger")
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteLedger for FixtureLedger {
    async fn simulate(&self, request: SimulateRequest<'_>) -> Result<SimulateResponse, RemoteError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                caller: request.caller,
                contract: request.contract,
                function: request.function.name.clone(),
                args: request.args.to_vec(),
                block: request.block.cloned(),
            });

        let responder = self
            .responders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&request.function.name)
            .cloned();

        match responder {
            Some(responder) => responder(&request).map(|result| SimulateResponse { result }),
            None => Err(RemoteError::Reverted {
                reason: format!("no fixture for '{}'", request.function.name),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::abi::{AbiType, Mutability, Param};

    fn increment() -> FunctionDescriptor {
        FunctionDescriptor {
            name: "increment".to_string(),
            inputs: vec![Param::new("by", AbiType::Uint { bits: 32 })],
            outputs: vec![],
            mutability: Mutability::NonPayable,
        }
    }

    fn request<'a>(f: &'a FunctionDescriptor, args: &'a [AbiValue]) -> SimulateRequest<'a> {
        SimulateRequest {
            caller: Address::from_bytes([1; 20]),
            contract: Address::from_bytes([2; 20]),
            function: f,
            args,
            block: None,
        }
    }

    #[tokio::test]
    async fn scripted_response_is_returned_and_call_recorded() {
        let ledger = FixtureLedger::new();
        ledger.respond("increment", json!({"value": 2}));

        let f = increment();
        let args = [AbiValue::uint(1)];
        let response = ledger.simulate(request(&f, &args)).await.unwrap();
        assert_eq!(response.result, json!({"value": 2}));

        let calls = ledger.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function, "increment");
        assert_eq!(calls[0].args, vec![AbiValue::uint(1)]);
    }

    #[tokio::test]
    async fn unscripted_function_reverts() {
        let ledger = FixtureLedger::new();
        let f = increment();
        let err = ledger.simulate(request(&f, &[])).await.unwrap_err();
        assert!(matches!(err, RemoteError::Reverted { .. }));
        assert!(!err.is_transport());
    }

    #[test]
    fn calldata_is_selector_then_arguments() {
        let f = increment();
        let args = [AbiValue::uint(5)];
        let data = request(&f, &args).calldata().unwrap();
        assert_eq!(data.len(), 4 + 32);
        assert_eq!(&data[..4], &f.selector());
        assert_eq!(data[35], 5);
    }
}
