//! Centralized error types for mailbot.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::message::MessageId;

/// All errors produced by the mailbot library.
#[derive(Error, Debug)]
pub enum MailbotError {
    /// A callback factory with this name is already in the registry.
    #[error("Callback '{0}' is already registered")]
    AlreadyRegistered(String),

    /// A rule names a field the extractor does not know.
    #[error("Unknown rule field '{0}' (expected subject, from, to, cc or body)")]
    UnknownField(String),

    /// A rule pattern is not a valid regular expression.
    #[error("Invalid pattern '{pattern}' for field '{field}': {source}")]
    InvalidPattern {
        field: String,
        pattern: String,
        source: regex::Error,
    },

    /// The mail store could not complete an operation.
    #[error("Mail store error during {operation}: {reason}")]
    Store {
        operation: &'static str,
        reason: String,
    },

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The store has no message with this id.
    #[error("No message with id {0} in mailbox")]
    UnknownMessage(MessageId),

    /// The configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, MailbotError>`.
pub type Result<T> = std::result::Result<T, MailbotError>;

impl MailbotError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `Store` variant for a failed operation.
    pub fn store(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Store {
            operation,
            reason: reason.into(),
        }
    }
}
