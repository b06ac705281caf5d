#![forbid(unsafe_code)]

use crate::ContractViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordErrorKind {
    InvalidArgument,
    ParseError,
    NotFound,
    EncodingError,
    StorageError,
    Conflict,
    UnknownOperation,
}

impl RecordErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            RecordErrorKind::ParseError => "PARSE_ERROR",
            RecordErrorKind::NotFound => "NOT_FOUND",
            RecordErrorKind::EncodingError => "ENCODING_ERROR",
            RecordErrorKind::StorageError => "STORAGE_ERROR",
            RecordErrorKind::Conflict => "CONFLICT",
            RecordErrorKind::UnknownOperation => "UNKNOWN_OPERATION",
        }
    }
}

/// Failure of a record operation. Every variant leaves committed ledger state untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("record {key} does not exist")]
    NotFound { key: String },
    #[error("encoding error: {0}")]
    EncodingError(String),
    #[error("storage error: {0}")]
    StorageError(String),
    /// The platform rejected the commit because a key in the read set changed underneath it.
    /// Callers retry the whole operation in a fresh transaction.
    #[error("write conflict on key {key}")]
    Conflict { key: String },
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
}

impl RecordError {
    pub fn kind(&self) -> RecordErrorKind {
        match self {
            RecordError::InvalidArgument(_) => RecordErrorKind::InvalidArgument,
            RecordError::ParseError(_) => RecordErrorKind::ParseError,
            RecordError::NotFound { .. } => RecordErrorKind::NotFound,
            RecordError::EncodingError(_) => RecordErrorKind::EncodingError,
            RecordError::StorageError(_) => RecordErrorKind::StorageError,
            RecordError::Conflict { .. } => RecordErrorKind::Conflict,
            RecordError::UnknownOperation(_) => RecordErrorKind::UnknownOperation,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == RecordErrorKind::Conflict
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        RecordError::NotFound { key: key.into() }
    }

    pub fn arity(operation: &str, expected: &str, got: usize) -> Self {
        RecordError::InvalidArgument(format!(
            "{operation} expects {expected} argument(s), got {got}"
        ))
    }
}

impl From<ContractViolation> for RecordError {
    fn from(v: ContractViolation) -> Self {
        match v {
            ContractViolation::InvalidValue { .. } => RecordError::InvalidArgument(v.to_string()),
            ContractViolation::InvalidFormat { .. } => RecordError::ParseError(v.to_string()),
        }
    }
}
