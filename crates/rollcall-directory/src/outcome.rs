//! Result of best-effort directory operations

use rollcall_core::{Error, Result};
use tracing::warn;

/// What happened to a remove, password change or group edit.
///
/// Transport failures are reported as `Failed` instead of an error so that
/// callers can tell them apart from a missing user. Argument and
/// not-supported errors are still returned as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Done,
    NotFound,
    Failed(String),
}

impl OperationOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Fold a backend result, swallowing transport errors.
    pub fn from_result(operation: &str, result: Result<bool>) -> Result<Self> {
        match result {
            Ok(true) => Ok(Self::Done),
            Ok(false) => Ok(Self::NotFound),
            Err(e @ (Error::NotSupported(_) | Error::InvalidArgument(_))) => Err(e),
            Err(e) => {
                warn!("{} failed: {}", operation, e.diagnostic());
                Ok(Self::Failed(e.to_string()))
            }
        }
    }

    /// Combine the outcomes of the same operation on several members: any
    /// success wins, then any failure, otherwise not found.
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Done, _) | (_, Self::Done) => Self::Done,
            (Self::Failed(e), _) | (_, Self::Failed(e)) => Self::Failed(e),
            _ => Self::NotFound,
        }
    }
}
