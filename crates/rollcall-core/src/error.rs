//! Error types for Rollcall

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while translating a filter for a specific backend.
///
/// These are surfaced at translate time, before any round-trip to the
/// backend happens.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Comparing field '{field}' against field '{other}' is not supported by this backend")]
    FieldComparison { field: String, other: String },

    #[error("Operator {operator} is not supported for {value} values on field '{field}'")]
    UnsupportedOperator {
        field: String,
        operator: String,
        value: String,
    },

    #[error("Value for field '{field}' cannot be encoded: {reason}")]
    UnsupportedValue { field: String, reason: String },

    #[error("Filter contains an empty {0} group")]
    EmptyGroup(&'static str),

    #[error("Filter nesting depth exceeds the backend limit of {0}")]
    TooDeep(usize),
}

#[derive(Error, Debug)]
pub enum Error {
    // Argument and validation errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Translation errors
    #[error("Invalid filter: {0}")]
    Filter(#[from] FilterError),

    // Backend transport errors
    #[error("Directory backend error: {message}")]
    Backend {
        message: String,
        /// Translated filter text, attached when the failure may stem from an
        /// oversized or malformed filter.
        filter: Option<String>,
    },

    #[error("Database error: {0}")]
    DatabaseError(String),

    // Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Wrap a backend failure without filter context.
    pub fn backend(message: impl Into<String>) -> Self {
        Error::Backend {
            message: message.into(),
            filter: None,
        }
    }

    /// Wrap a backend failure that happened while executing `filter`.
    pub fn backend_with_filter(message: impl Into<String>, filter: impl Into<String>) -> Self {
        Error::Backend {
            message: message.into(),
            filter: Some(filter.into()),
        }
    }

    /// Diagnostic text for operators, including the filter when one is attached.
    pub fn diagnostic(&self) -> String {
        match self {
            Error::Backend {
                message,
                filter: Some(filter),
            } => format!(
                "{} (the filter may be too long or malformed: {})",
                message, filter
            ),
            other => other.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::ConfigError(_) => "ConfigError",
            Error::NotSupported(_) => "NotSupported",
            Error::NotFound(_) => "NotFound",
            Error::Filter(_) => "InvalidFilter",
            Error::Backend { .. } => "DirectoryError",
            Error::DatabaseError(_) => "DatabaseError",
            Error::InternalError(_) => "InternalError",
            Error::Io(_) => "InternalError",
            Error::Other(_) => "InternalError",
        }
    }

    /// Argument, filter and not-supported errors are programming or input
    /// errors and never succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Backend { .. } | Error::DatabaseError(_) | Error::Io(_)
        )
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, Error::NotSupported(_))
    }
}
