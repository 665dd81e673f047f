// SPDX-License-Identifier: GPL-3.0-or-later
use std::time::Duration;

use spotsync_infrastructure::StoreError;
use thiserror::Error;

/// Errors surfaced by the reconciliation core. Every one of them is scoped to
/// a single request.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed or unsupported external link. Nothing was written.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// The targeted request does not exist. Re-fetch instead of retrying.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("destructive operation requires explicit confirmation")]
    ConfirmationRequired,

    /// The catalog resolver failed. Counts against the request's retries.
    #[error("catalog resolver unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Persistence failed even after reconnecting.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("write rejected by store: {0}")]
    DuplicateOrInvalid(String),

    /// The pass did not finish within its deadline and was abandoned.
    #[error("pass abandoned after {0:?}")]
    Timeout(Duration),

    /// Another writer updated the request first.
    #[error("request {0} was updated concurrently")]
    Conflict(String),
}

/// Result type for reconciliation operations
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Failures of the external collaborator, paid for with `retry_count`.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_) | Self::Timeout(_))
    }

    /// Whether the same call may succeed later without any change on the
    /// caller's side.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable(_)
                | Self::Timeout(_)
                | Self::StoreUnavailable(_)
                | Self::Conflict(_)
        )
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::Conflict(id) => Self::Conflict(id),
            StoreError::Constraint(msg) => Self::DuplicateOrInvalid(msg),
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            other @ (StoreError::Corrupt(_) | StoreError::Database(_)) => {
                Self::StoreUnavailable(other.to_string())
            }
        }
    }
}
