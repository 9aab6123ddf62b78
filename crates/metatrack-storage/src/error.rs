//! Storage error types for the execution facade.
//!
//! Every backend maps its native failures onto [`StorageError`] so callers
//! never depend on a concrete driver's error type.

use std::fmt;

/// Errors that can occur while executing statements against a store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to reach the storage backend.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// A statement was rejected or failed while executing.
    #[error("Query error in {statement}: {message}")]
    Query {
        /// Name of the failing statement.
        statement: String,
        /// Backend-provided failure description.
        message: String,
    },

    /// A row could not be decoded into the expected shape.
    #[error("Decode error for column {column}: {message}")]
    Decode {
        /// Column that failed to decode.
        column: String,
        /// Description of the mismatch.
        message: String,
    },

    /// The backend has no implementation for the named statement.
    #[error("Unknown statement: {name}")]
    UnknownStatement {
        /// Statement name.
        name: String,
    },

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a new `Query` error.
    #[must_use]
    pub fn query(statement: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            statement: statement.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Decode` error.
    #[must_use]
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Creates a new `UnknownStatement` error.
    #[must_use]
    pub fn unknown_statement(name: impl Into<String>) -> Self {
        Self::UnknownStatement { name: name.into() }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` when retrying later may succeed without any change.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Infrastructure,
            Self::Query { .. } | Self::UnknownStatement { .. } => ErrorCategory::Query,
            Self::Decode { .. } => ErrorCategory::Decode,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of storage errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Infrastructure/connection error.
    Infrastructure,
    /// Statement execution error.
    Query,
    /// Row decoding error.
    Decode,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Query => write!(f, "query"),
            Self::Decode => write!(f, "decode"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
