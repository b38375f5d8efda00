//! Error types for the mirror engine.
//!
//! Errors are strongly typed using thiserror. Setup failures
//! (`ConfigurationError`) abort mirror construction; invocation failures
//! (`InvocationError`) are local to a single action and never leave a partial
//! write behind.

use thiserror::Error;

use crate::ledger::RemoteError;
use crate::store::StorageError;

/// Errors raised while synthesizing schemas and actions or loading configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// No table is marked for mirroring.
    #[error("No offchain-synced tables defined")]
    NoEligibleTables,

    /// No callable unit is configured.
    #[error("No offchain-synced systems defined")]
    NoSystems,

    /// A unit has no interface file.
    #[error("No interface found for system '{unit}'")]
    MissingInterface {
        /// Unit name.
        unit: String,
    },

    /// An interface file could not be parsed.
    #[error("Invalid interface for system '{unit}': {reason}")]
    InvalidInterface {
        /// Unit name.
        unit: String,
        /// Parse failure.
        reason: String,
    },

    /// Two functions map to the same action name.
    #[error("Action '{name}' is defined more than once ({first} and {second})")]
    DuplicateAction {
        /// Action name.
        name: String,
        /// Unit declaring it first.
        first: String,
        /// Unit declaring it again.
        second: String,
    },

    /// A table uses a reserved field name.
    #[error("Table '{table}' declares reserved field '{field}'")]
    ReservedField {
        /// Table name.
        table: String,
        /// Offending field.
        field: String,
    },

    /// An eligibility pattern does not compile.
    #[error("Invalid eligibility rule: {reason}")]
    InvalidRule {
        /// Compile failure.
        reason: String,
    },

    /// Configuration could not be read or parsed.
    #[error("Failed to read configuration: {message}")]
    Load {
        /// Underlying failure.
        message: String,
    },
}

/// Errors raised by a single action invocation.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// Arguments are not an object or do not fit their types.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong.
        reason: String,
    },

    /// A declared input has no named argument.
    #[error("Action '{function}' is missing required argument '{parameter}'")]
    MissingArgument {
        /// Function invoked.
        function: String,
        /// Missing parameter.
        parameter: String,
    },

    /// No action with this name.
    #[error("Unknown action '{name}'")]
    UnknownAction {
        /// Requested name.
        name: String,
    },

    /// The output cannot be mapped onto a local table.
    #[error("Schema mismatch for '{function}': {reason}")]
    SchemaMismatch {
        /// Function invoked.
        function: String,
        /// What did not match.
        reason: String,
    },

    /// The remote simulation failed.
    #[error("Remote call '{function}' failed: {source}")]
    RemoteCall {
        /// Function invoked.
        function: String,
        /// Ledger failure.
        #[source]
        source: RemoteError,
    },
}

/// Top-level error type for the mirror engine.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Setup failure.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Failure of one invocation.
    #[error("Invocation error: {0}")]
    Invocation(#[from] InvocationError),

    /// Store failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl MirrorError {
    /// Returns true if this is a setup-time configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if the action arguments were malformed or incomplete.
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::Invocation(
                InvocationError::InvalidArgument { .. }
                    | InvocationError::MissingArgument { .. }
                    | InvocationError::UnknownAction { .. }
            )
        )
    }

    /// Returns true if no target table could be derived or the remote output
    /// did not match its declared shape.
    #[must_use]
    pub const fn is_schema_mismatch(&self) -> bool {
        matches!(self, Self::Invocation(InvocationError::SchemaMismatch { .. }))
    }

    /// Returns true if the remote simulation reverted or could not be reached.
    #[must_use]
    pub const fn is_remote_call(&self) -> bool {
        matches!(self, Self::Invocation(InvocationError::RemoteCall { .. }))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if retrying the same invocation may succeed.
    ///
    /// Only transport failures qualify; a revert is deterministic for the
    /// remote state it ran against.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Invocation(InvocationError::RemoteCall { source, .. }) => source.is_transport(),
            _ => false,
        }
    }
}

/// Result type alias for mirror operations.
pub type MirrorResult<T> = Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_messages() {
        let err = ConfigurationError::NoEligibleTables;
        assert!(err.to_string().contains("No offchain-synced tables"));

        let err = ConfigurationError::DuplicateAction {
            name: "move".to_string(),
            first: "MapSystem".to_string(),
            second: "PlayerSystem".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("move"));
        assert!(msg.contains("MapSystem"));
        assert!(msg.contains("PlayerSystem"));
    }

    #[test]
    fn test_missing_argument_is_invalid_argument() {
        let err: MirrorError = InvocationError::MissingArgument {
            function: "register".to_string(),
            parameter: "name".to_string(),
        }
        .into();
        assert!(err.is_invalid_argument());
        assert!(!err.is_remote_call());
        assert!(err.to_string().contains("'name'"));
    }

    #[test]
    fn test_remote_call_retryability() {
        let reverted: MirrorError = InvocationError::RemoteCall {
            function: "send".to_string(),
            source: RemoteError::Reverted {
                reason: "not allowed".to_string(),
            },
        }
        .into();
        assert!(reverted.is_remote_call());
        assert!(!reverted.is_retryable());

        let transport: MirrorError = InvocationError::RemoteCall {
            function: "send".to_string(),
            source: RemoteError::Transport {
                message: "connection refused".to_string(),
            },
        }
        .into();
        assert!(transport.is_retryable());
        assert!(transport.to_string().contains("connection refused"));
    }

    #[test]
    fn test_schema_mismatch_predicate() {
        let err: MirrorError = InvocationError::SchemaMismatch {
            function: "ping".to_string(),
            reason: "no struct output".to_string(),
        }
        .into();
        assert!(err.is_schema_mismatch());
        assert!(!err.is_configuration());
    }
}
