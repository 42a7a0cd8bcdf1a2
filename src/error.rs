//! Error types for the Terrace provisioning engine.
//!
//! This module provides the error hierarchy for every phase of a run:
//! configuration, graph construction, planning, provider calls, state
//! management, and execution.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Terrace provisioning engine.
#[derive(Debug, Error)]
pub enum TerraceError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resource graph construction errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Execution errors.
    #[error("Execution error: {0}")]
    Execute(#[from] ExecuteError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// A reference expression could not be parsed.
    #[error("Invalid reference '{expression}': expected ${{type.name.key}}")]
    InvalidReference {
        /// The offending expression.
        expression: String,
    },

    /// A resource identifier could not be parsed.
    #[error("Invalid resource identifier '{value}': expected type.name")]
    InvalidResourceId {
        /// The offending value.
        value: String,
    },
}

/// Resource graph construction errors.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The same identity was declared twice.
    #[error("Duplicate resource: {id}")]
    DuplicateResource {
        /// The duplicated identity.
        id: String,
    },

    /// A reference or explicit dependency names a resource absent from the graph.
    #[error("{from} references undeclared resource {target}")]
    Reference {
        /// Resource holding the dangling reference.
        from: String,
        /// The missing target.
        target: String,
    },

    /// The dependency relation contains a cycle.
    #[error("Dependency cycle between: {}", .members.join(", "))]
    Cycle {
        /// Every resource lying on a cycle, sorted.
        members: Vec<String>,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A changed attribute has no declared update or replace policy.
    #[error("No diff policy for attribute '{attribute}' of {resource_type} '{name}'")]
    DiffPolicy {
        /// Type of the resource.
        resource_type: String,
        /// Name of the resource.
        name: String,
        /// The unclassified attribute.
        attribute: String,
    },

    /// A reference resolves to a node absent from the graph, or to an output
    /// key the referenced resource does not expose.
    #[error("{from} references {target}.{key}, which is not available")]
    Reference {
        /// Resource holding the reference.
        from: String,
        /// Referenced resource.
        target: String,
        /// Referenced output key.
        key: String,
    },

    /// The plan would delete or replace a protected resource.
    #[error("Refusing to {action} protected resource {id}")]
    ProtectedResource {
        /// The protected identity.
        id: String,
        /// What the plan wanted to do.
        action: String,
    },
}

/// Classification of a provider rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorCode {
    /// The provider asked us to slow down.
    Throttled,
    /// Transient network or server failure.
    Transient,
    /// The request carried invalid attributes.
    InvalidInput,
    /// Authentication or authorization failed.
    PermissionDenied,
    /// An account quota would be exceeded.
    QuotaExceeded,
    /// The addressed resource does not exist.
    NotFound,
    /// The request conflicts with the resource's current state.
    Conflict,
}

/// A rejection reported by a provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ProviderError {
    /// Classification of the failure.
    pub code: ProviderErrorCode,
    /// Provider-supplied message.
    pub message: String,
    /// Delay the provider asked for before retrying.
    pub retry_after_secs: Option<u64>,
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Execution errors.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// An attribute could not be resolved at apply time.
    #[error("Cannot resolve {target}.{key} for {from}")]
    Unresolved {
        /// Resource holding the reference.
        from: String,
        /// Referenced resource.
        target: String,
        /// Referenced output key.
        key: String,
    },

    /// The run was aborted before execution.
    #[error("Run aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for Terrace operations.
pub type Result<T> = std::result::Result<T, TerraceError>;

impl TerraceError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Provider(e) if e.is_retryable() => match e.retry_after_secs {
                Some(secs) => Some(secs),
                None => Some(1),
            },
            Self::State(StateError::LockFailed { .. }) => Some(2),
            _ => None,
        }
    }

    /// Returns true if this error happened while building or planning,
    /// before anything was mutated.
    #[must_use]
    pub const fn is_planning_failure(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Graph(_) | Self::Plan(_))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl ProviderError {
    /// Creates a provider error with the given code.
    #[must_use]
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Creates a throttling error carrying the provider's retry hint.
    #[must_use]
    pub fn throttled(retry_after_secs: u64) -> Self {
        Self {
            code: ProviderErrorCode::Throttled,
            message: format!("rate limited, retry after {retry_after_secs}s"),
            retry_after_secs: Some(retry_after_secs),
        }
    }

    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Transient, message)
    }

    /// Creates an invalid-input error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidInput, message)
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(provider_id: &str) -> Self {
        Self::new(ProviderErrorCode::NotFound, format!("resource {provider_id} not found"))
    }

    /// Returns true if the call may succeed when retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            ProviderErrorCode::Throttled | ProviderErrorCode::Transient
        )
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write failure with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Throttled => "throttled",
            Self::Transient => "transient",
            Self::InvalidInput => "invalid input",
            Self::PermissionDenied => "permission denied",
            Self::QuotaExceeded => "quota exceeded",
            Self::NotFound => "not found",
            Self::Conflict => "conflict",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_retry_classification() {
        assert!(ProviderError::throttled(3).is_retryable());
        assert!(ProviderError::transient("connection reset").is_retryable());
        assert!(!ProviderError::invalid_input("bad cidr").is_retryable());
        assert!(!ProviderError::new(ProviderErrorCode::PermissionDenied, "denied").is_retryable());
    }

    #[test]
    fn test_retry_delay_uses_provider_hint() {
        let err = TerraceError::from(ProviderError::throttled(7));
        assert_eq!(err.retry_delay_secs(), Some(7));

        let err = TerraceError::from(ProviderError::invalid_input("nope"));
        assert_eq!(err.retry_delay_secs(), None);
    }

    #[test]
    fn test_cycle_message_lists_members() {
        let err = GraphError::Cycle {
            members: vec![String::from("network.a"), String::from("subnet.b")],
        };
        assert_eq!(err.to_string(), "Dependency cycle between: network.a, subnet.b");
    }
}
