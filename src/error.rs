//! Error types for the ManagedSeed operator

use thiserror::Error;

/// Result type for the operator
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the operator
#[derive(Debug, Error)]
pub enum Error {
    /// Object expected by the caller does not exist
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// Create raced with another writer
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    /// Optimistic concurrency conflict reported by the API server
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Kubernetes API or transport error
    #[error("Kubernetes API error: {0}")]
    KubeError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Secret error
    #[error("Secret error: {0}")]
    SecretError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Inconsistent state that needs operator intervention
    #[error("Fatal error: {0}")]
    FatalError(String),
}

impl Error {
    /// Build a not-found error for the given kind and name
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }

    /// Errors that are expected to resolve on their own after a retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::KubeError(_) | Error::Conflict(_) | Error::AlreadyExists { .. }
        )
    }

    /// Short machine-readable name used for metrics labels
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::AlreadyExists { .. } => "already_exists",
            Error::Conflict(_) => "conflict",
            Error::KubeError(_) => "kube",
            Error::ConfigError(_) => "config",
            Error::ValidationError(_) => "validation",
            Error::SecretError(_) => "secret",
            Error::SerializationError(_) => "serialization",
            Error::FatalError(_) => "fatal",
        }
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 404 => Error::NotFound {
                kind: response.reason,
                name: response.message,
            },
            kube::Error::Api(response)
                if response.code == 409 && response.reason == "AlreadyExists" =>
            {
                Error::AlreadyExists {
                    kind: response.reason,
                    name: response.message,
                }
            }
            kube::Error::Api(response) if response.code == 409 => {
                Error::Conflict(response.message)
            }
            kube::Error::Api(response) if response.code == 422 || response.code == 400 => {
                Error::ValidationError(response.message)
            }
            other => Error::KubeError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}
