//! Error types for the sync engine.

use thiserror::Error;

/// All possible failures inside a sync cycle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    // Transient network failures: retried on the next scheduled cycle
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    // Permanent rejection from the authority: not auto-retried
    #[error("rejected by authority ({status}): {message}")]
    Rejected { status: u16, message: String },

    // Local failures
    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid response from authority: {0}")]
    InvalidResponse(String),
}

impl SyncError {
    /// Whether this failure is worth retrying automatically.
    ///
    /// Timeouts, connection failures, and 5xx responses are transient;
    /// 4xx rejections and malformed responses are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Timeout(_) | SyncError::Connection(_) | SyncError::Server { .. }
        )
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// One problem recorded in a cycle report.
///
/// The reconciler never raises errors across its public boundary;
/// everything it hits becomes an issue in the [`CycleReport`].
///
/// [`CycleReport`]: crate::reconcile::CycleReport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncIssue {
    /// What the engine was doing ("push conversation c1", "pull", ...)
    pub context: String,
    /// Human-readable failure description
    pub message: String,
    /// Whether this issue should surface to the user. Transient failures
    /// below the retry maximum stay invisible.
    pub visible: bool,
}

impl SyncIssue {
    pub fn transient(context: impl Into<String>, error: &SyncError) -> Self {
        Self {
            context: context.into(),
            message: error.to_string(),
            visible: false,
        }
    }

    pub fn visible(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            message: message.into(),
            visible: true,
        }
    }
}
