//! Domain errors

use crate::domain::call::value_object::CallState;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid state transition: {trigger} is not applicable in state {state}")]
    InvalidTransition { state: CallState, trigger: String },

    #[error("Normalization error: {0}")]
    Normalization(#[from] NormalizationError),

    #[error("Session mismatch: expected {expected}, got {actual}")]
    SessionMismatch { expected: String, actual: String },

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Entity already exists: {0}")]
    AlreadyExists(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl DomainError {
    pub fn invalid_transition(state: CallState, trigger: impl Into<String>) -> Self {
        DomainError::InvalidTransition {
            state,
            trigger: trigger.into(),
        }
    }

    /// Short label used for log fields and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::InvalidTransition { .. } => "invalid_transition",
            DomainError::Normalization(_) => "normalization",
            DomainError::SessionMismatch { .. } => "session_mismatch",
            DomainError::NotFound(_) => "not_found",
            DomainError::AlreadyExists(_) => "already_exists",
            DomainError::ValidationError(_) => "validation",
        }
    }
}

/// Raised when a native payload cannot be turned into a canonical event.
///
/// These never leave the bridge boundary as events: the payload is logged and dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("unknown native action '{0}'")]
    UnknownAction(String),

    #[error("{action}: missing required field '{field}'")]
    MissingField { action: String, field: String },

    #[error("{action}: field '{field}' should be {expected}")]
    UnexpectedType {
        action: String,
        field: String,
        expected: &'static str,
    },

    #[error("{action}: unsupported value '{value}' for field '{field}'")]
    UnsupportedValue {
        action: String,
        field: String,
        value: String,
    },

    #[error("payload addressed to session '{actual}', bridge serves '{expected}'")]
    ForeignSession { expected: String, actual: String },
}

impl NormalizationError {
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizationError::NotAnObject => "not_an_object",
            NormalizationError::InvalidJson(_) => "invalid_json",
            NormalizationError::UnknownAction(_) => "unknown_action",
            NormalizationError::MissingField { .. } => "missing_field",
            NormalizationError::UnexpectedType { .. } => "unexpected_type",
            NormalizationError::UnsupportedValue { .. } => "unsupported_value",
            NormalizationError::ForeignSession { .. } => "foreign_session",
        }
    }
}
