//! The mirrored action handler.
//!
//! One handler exists per synthesized action. On invocation it projects the
//! named arguments onto the function's declared inputs, simulates the call on
//! the remote ledger, canonicalizes the returned fields and upserts them into
//! the target table under the keccak-256 digest of their encoding.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value as Json};
use tracing::{debug, info_span, warn, Instrument};

use crate::abi::{encode_digest, AbiType, AbiValue, Component, Digest, FunctionDescriptor};
use crate::address::Address;
use crate::context::InvocationContext;
use crate::error::{InvocationError, MirrorError, MirrorResult};
use crate::ledger::{RemoteLedger, SimulateRequest};
use crate::schema::{PropertyType, TableSchema, KEY_FIELD, TIMESTAMP_FIELD};
use crate::store::{ActionHandler, LocalValue, Record, ReplicaStore};

/// Outcome of a successful invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// Table the record was written to.
    pub table: String,
    /// Content digest the record is stored under.
    pub key: Digest,
    /// Record as stored.
    pub record: Record,
}

/// The remote side an instance is bound to.
pub struct RemoteScope {
    /// Ledger to simulate on.
    pub ledger: Arc<dyn RemoteLedger>,
    /// Bound contract.
    pub contract: Address,
}

impl std::fmt::Debug for RemoteScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteScope")
            .field("contract", &self.contract)
            .finish_non_exhaustive()
    }
}

/// Handler for one mirrored remote function.
#[derive(Debug, Clone)]
pub struct MirrorHandler {
    function: Arc<FunctionDescriptor>,
    scope: Arc<RemoteScope>,
}

impl MirrorHandler {
    /// Creates a handler for one function.
    #[must_use]
    pub fn new(function: Arc<FunctionDescriptor>, scope: Arc<RemoteScope>) -> Self {
        Self { function, scope }
    }

    /// Function this handler mirrors.
    #[must_use]
    pub fn function(&self) -> &FunctionDescriptor {
        &self.function
    }

    fn schema_mismatch(&self, reason: impl Into<String>) -> MirrorError {
        InvocationError::SchemaMismatch {
            function: self.function.name.clone(),
            reason: reason.into(),
        }
        .into()
    }

    /// Resolves the target table and checks the output against its schema.
    fn resolve_target<'s>(
        &self,
        db: &'s dyn ReplicaStore,
    ) -> MirrorResult<(&'s TableSchema, &[Component])> {
        let table = target_table(&self.function).map_err(|reason| self.schema_mismatch(reason))?;
        let schema = db
            .schemas()
            .get(&table)
            .ok_or_else(|| self.schema_mismatch(format!("no local table '{table}'")))?;

        let components = self.function.outputs[0].components().unwrap_or_default();
        if let Some(missing) = components.iter().find(|c| schema.field(&c.name).is_none()) {
            return Err(self.schema_mismatch(format!(
                "output field '{}' is not a field of table '{table}'",
                missing.name
            )));
        }
        Ok((schema, components))
    }

    /// Projects named arguments onto the declared inputs.
    fn project_args(&self, args: &Json) -> MirrorResult<Vec<AbiValue>> {
        let empty = Map::new();
        let named = match args {
            Json::Null => &empty,
            Json::Object(map) => map,
            other => {
                return Err(InvocationError::InvalidArgument {
                    reason: format!("action arguments must be an object, got {other}"),
                }
                .into())
            }
        };

        self.function
            .inputs
            .iter()
            .map(|input| -> MirrorResult<AbiValue> {
                let value = named.get(&input.name).ok_or_else(|| InvocationError::MissingArgument {
                    function: self.function.name.clone(),
                    parameter: input.name.clone(),
                })?;
                AbiValue::from_json(&input.ty, value).map_err(|reason| {
                    MirrorError::from(InvocationError::InvalidArgument {
                        reason: format!("argument '{}': {reason}", input.name),
                    })
                })
            })
            .collect()
    }

    /// Coerces the simulation result into the declared output components.
    fn canonicalize(&self, components: &[Component], result: &Json) -> MirrorResult<Vec<AbiValue>> {
        // A single struct output may come back wrapped in a one-element array.
        let result = match result {
            Json::Array(items) if items.len() == 1 && components.len() != 1 => &items[0],
            other => other,
        };
        let tuple = AbiType::Tuple {
            components: components.to_vec(),
        };
        match AbiValue::from_json(&tuple, result) {
            Ok(AbiValue::Tuple(values)) => Ok(values),
            Ok(_) => Err(self.schema_mismatch("result is not a tuple")),
            Err(reason) => Err(self.schema_mismatch(format!("result: {reason}"))),
        }
    }

    fn build_record(
        &self,
        schema: &TableSchema,
        components: &[Component],
        values: &[AbiValue],
        ctx: &InvocationContext,
    ) -> MirrorResult<Record> {
        let mut record = Record::new();
        for (component, value) in components.iter().zip(values) {
            // Presence was checked in resolve_target.
            let local = schema.field(&component.name).unwrap_or(PropertyType::String);
            let converted = to_local(value, &component.ty, local)
                .map_err(|reason| self.schema_mismatch(format!("field '{}': {reason}", component.name)))?;
            record.insert(component.name.clone(), converted);
        }
        record.insert(KEY_FIELD, ctx.id.clone());
        record.insert(TIMESTAMP_FIELD, ctx.timestamp);
        Ok(record)
    }

    async fn run(
        &self,
        db: &dyn ReplicaStore,
        args: &Json,
        ctx: &InvocationContext,
    ) -> MirrorResult<Applied> {
        let (schema, components) = self.resolve_target(db)?;
        let positional = self.project_args(args)?;

        let request = SimulateRequest {
            caller: ctx.address,
            contract: self.scope.contract,
            function: &self.function,
            args: &positional,
            block: ctx.block.as_ref(),
        };
        debug!(contract = %self.scope.contract, caller = %ctx.address, "simulating remote call");
        let response = self.scope.ledger.simulate(request).await.map_err(|source| {
            warn!(error = %source, "remote simulation failed");
            InvocationError::RemoteCall {
                function: self.function.name.clone(),
                source,
            }
        })?;

        let values = self.canonicalize(components, &response.result)?;
        let types: Vec<AbiType> = components.iter().map(|c| c.ty.clone()).collect();
        let key = encode_digest(&types, &values)
            .map_err(|e| self.schema_mismatch(format!("encoding: {e}")))?;
        let record = self.build_record(schema, components, &values, ctx)?;

        db.set(&schema.name, key, record.clone())?;
        debug!(table = %schema.name, %key, "record upserted");

        Ok(Applied {
            table: schema.name.clone(),
            key,
            record,
        })
    }
}

#[async_trait]
impl ActionHandler for MirrorHandler {
    async fn apply(
        &self,
        db: &dyn ReplicaStore,
        args: &Json,
        ctx: &InvocationContext,
    ) -> MirrorResult<Applied> {
        let span = info_span!("mirror.apply", action = %self.function.name, invocation = %ctx.id);
        self.run(db, args, ctx).instrument(span).await
    }
}

fn struct_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^struct\s+(?:[A-Za-z_$][\w$]*\.)*([A-Za-z_$][\w$]*)$")
            .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
    })
}

/// Derives the local table a function's result is written to.
///
/// The function must have exactly one output, a tuple whose internal type is
/// `struct <Name>` (optionally qualified). The table is `<Name>` without a
/// trailing `Data`.
pub fn target_table(function: &FunctionDescriptor) -> Result<String, String> {
    let [output] = function.outputs.as_slice() else {
        return Err(format!(
            "expected exactly one output, found {}",
            function.outputs.len()
        ));
    };
    if output.components().is_none() {
        return Err(format!("output type {} is not a struct", output.ty));
    }
    let internal = output
        .internal_type
        .as_deref()
        .ok_or_else(|| "output has no internal type".to_string())?;
    let name = struct_name_pattern()
        .captures(internal.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| format!("internal type '{internal}' is not a struct"))?;

    let table = match name.strip_suffix("Data") {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => name,
    };
    Ok(table.to_string())
}

/// Converts a canonical value into the local primitive set.
fn to_local(value: &AbiValue, ty: &AbiType, local: PropertyType) -> Result<LocalValue, String> {
    match local {
        PropertyType::Integer => value
            .as_i64()
            .map(LocalValue::Integer)
            .ok_or_else(|| format!("{ty} value does not fit a local integer")),
        PropertyType::Float => match value {
            AbiValue::Uint(_) | AbiValue::Int(_) | AbiValue::Bool(_) => {
                let rendered = match value.to_json(ty) {
                    Json::String(s) => s,
                    other => other.to_string(),
                };
                let parsed = if let AbiValue::Bool(b) = value {
                    f64::from(u8::from(*b))
                } else {
                    rendered.parse::<f64>().map_err(|e| e.to_string())?
                };
                Ok(LocalValue::Float(parsed))
            }
            _ => Err(format!("{ty} cannot be stored as a float")),
        },
        PropertyType::Bytes => match value {
            AbiValue::Bytes(b) | AbiValue::FixedBytes(b) => Ok(LocalValue::Bytes(b.clone())),
            AbiValue::String(s) => Ok(LocalValue::Bytes(s.as_bytes().to_vec())),
            _ => Err(format!("{ty} cannot be stored as bytes")),
        },
        PropertyType::String => Ok(LocalValue::String(match value.to_json(ty) {
            Json::String(s) => s,
            other => other.to_string(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::abi::{Mutability, Param};

    fn messages_output(internal: &str) -> Param {
        Param::new(
            "",
            AbiType::Tuple {
                components: vec![
                    Component::new("from", AbiType::Address),
                    Component::new("message", AbiType::String),
                ],
            },
        )
        .with_internal_type(internal)
    }

    fn function(outputs: Vec<Param>) -> FunctionDescriptor {
        FunctionDescriptor {
            name: "send".to_string(),
            inputs: vec![],
            outputs,
            mutability: Mutability::NonPayable,
        }
    }

    #[test]
    fn target_table_strips_data_suffix_and_qualifier() {
        let f = function(vec![messages_output("struct MessagesTableData")]);
        assert_eq!(target_table(&f).unwrap(), "MessagesTable");

        let f = function(vec![messages_output("struct IWorld.Position")]);
        assert_eq!(target_table(&f).unwrap(), "Position");

        let f = function(vec![messages_output("struct Data")]);
        assert_eq!(target_table(&f).unwrap(), "Data");
    }

    #[test]
    fn target_table_requires_single_struct_output() {
        assert!(target_table(&function(vec![])).is_err());

        let scalar = Param::new("", AbiType::Uint { bits: 32 }).with_internal_type("uint32");
        assert!(target_table(&function(vec![scalar])).is_err());

        let enum_like = messages_output("enum Direction");
        assert!(target_table(&function(vec![enum_like])).is_err());
    }

    #[test]
    fn local_conversion_follows_property_type() {
        let big = AbiValue::uint(1 << 40);
        let uint256 = AbiType::Uint { bits: 256 };
        assert_eq!(
            to_local(&big, &uint256, PropertyType::String).unwrap(),
            LocalValue::String("1099511627776".into())
        );
        assert_eq!(
            to_local(&AbiValue::Bool(true), &AbiType::Bool, PropertyType::Integer).unwrap(),
            LocalValue::Integer(1)
        );
        assert_eq!(
            to_local(&AbiValue::int(-3), &AbiType::Int { bits: 64 }, PropertyType::Float).unwrap(),
            LocalValue::Float(-3.0)
        );

        let addr = AbiValue::Address(Address::from_bytes([0xAB; 20]));
        assert_eq!(
            to_local(&addr, &AbiType::Address, PropertyType::String).unwrap(),
            LocalValue::String(format!("0x{}", "ab".repeat(20)))
        );

        let list = AbiValue::Array(vec![AbiValue::uint(1), AbiValue::uint(2)]);
        let list_ty = AbiType::Array {
            element: Box::new(AbiType::Uint { bits: 8 }),
        };
        assert_eq!(
            to_local(&list, &list_ty, PropertyType::String).unwrap(),
            LocalValue::String(json!(["1", "2"]).to_string())
        );
        assert!(to_local(&list, &list_ty, PropertyType::Bytes).is_err());
    }
}
