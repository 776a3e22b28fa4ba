//! Crate-wide error taxonomy.
//!
//! Four classes: format errors (fatal to the current operation, never
//! retried internally), transport errors (surfaced to the caller, who owns
//! any retry policy), cancellation (kept distinct so user aborts are not
//! reported as failures), and state violations (programmer errors).
//!
//! The enum is `Clone`: a single loader failure settles every concurrent
//! waiter and every subscribed listener with the same error value.

use crate::chunk::state::{ChunkState, TransitionEvent};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Malformed input: bad magic, malformed control frame, mixed-type
    /// reconstruction, truncated structure.
    #[error("format error: {0}")]
    Format(String),

    /// Non-OK/Partial HTTP status.
    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    /// 416 on a suffix-range request that still had content pending.
    #[error("range could not be satisfied for {url}")]
    RangeNotSatisfiable { url: String },

    /// Connection-level failure: I/O error, missing body, closed stream.
    #[error("transport error: {0}")]
    Transport(String),

    /// The operation was cancelled before completion.
    #[error("operation cancelled")]
    Cancelled,

    /// An event was sent to a state machine that has no transition for it.
    #[error("invalid transition: {event:?} in state {state:?}")]
    InvalidTransition {
        state: ChunkState,
        event: TransitionEvent,
    },
}

impl Error {
    pub fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}
