//! error types for the patience controller

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatienceError {
    /// the game service refused the action (illegal flip/place, not shuffled, ...)
    #[error("rejected by game service: {0}")]
    Rejected(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// the action target changed between decision and request
    #[error("stale action: {0}")]
    Stale(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} already in progress")]
    Busy(String),

    #[error("state invariant violated: {0}")]
    Invariant(String),

    #[error("pile destinations not available from layout")]
    LayoutUnavailable,

    #[error("operation cancelled")]
    Cancelled,

    #[error("no active session")]
    NoSession,
}

pub type Result<T> = std::result::Result<T, PatienceError>;

impl PatienceError {
    /// the action raced a state change on the service; safe to re-read and continue
    pub fn is_benign_staleness(&self) -> bool {
        matches!(self, PatienceError::Stale(_))
    }

    /// network-level failure, the service never judged the request
    pub fn is_transient(&self) -> bool {
        matches!(self, PatienceError::Transport(_))
    }
}

impl From<reqwest::Error> for PatienceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            PatienceError::Malformed(e.to_string())
        } else {
            PatienceError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for PatienceError {
    fn from(e: serde_json::Error) -> Self {
        PatienceError::Malformed(e.to_string())
    }
}
