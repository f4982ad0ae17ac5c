//! Typed error hierarchy for the Slipway release engine.
//!
//! Two top-level enums cover the two failure domains:
//! - `CoreError` — domain and lifecycle failures surfaced to callers
//! - `HostingError` — Git-hosting call failures, captured on tasks/steps
//!   and counted against retries rather than thrown through the engine

use thiserror::Error;

/// Errors surfaced synchronously to callers of the release engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{entity} cannot {attempted} from {current}")]
    InvalidState {
        entity: String,
        current: String,
        attempted: String,
    },

    #[error("{kind} {id} not found")]
    NotFound { kind: String, id: String },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    External(#[from] HostingError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// Stable machine-readable code for the excluded presentation layer.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation { .. } => "VALIDATION",
            CoreError::InvalidState { .. } => "INVALID_STATE",
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::Unsupported(_) => "UNSUPPORTED",
            CoreError::LockPoisoned => "INTERNAL",
            CoreError::External(_) => "EXTERNAL",
            CoreError::Other(_) => "INTERNAL",
        }
    }

    /// Shorthand for a validation failure on a named field.
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Shorthand for a forbidden lifecycle transition.
    pub fn invalid_state(entity: &str, current: impl ToString, attempted: &str) -> Self {
        CoreError::InvalidState {
            entity: entity.to_string(),
            current: current.to_string(),
            attempted: attempted.to_string(),
        }
    }

    /// Shorthand for an identity lookup miss.
    pub fn not_found(kind: &str, id: &str) -> Self {
        CoreError::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}

/// Errors from Git-hosting calls. These never abort unrelated work: the
/// orchestrator records them on the owning task/step instead of propagating.
#[derive(Debug, Error)]
pub enum HostingError {
    #[error("Hosting call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Hosting API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Ref {reference} not found in {repo}")]
    RefNotFound { repo: String, reference: String },
}

/// Result type for release-engine operations.
pub type Result<T> = std::result::Result<T, CoreError>;
