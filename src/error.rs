//! Error taxonomy for a conversation session.
//!
//! Only [`SessionError`] is ever surfaced to the caller. Render errors are
//! absorbed by the playback queue and transmit drops are not errors at all.

use thiserror::Error;

/// Fatal session errors, surfaced as user-visible status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Capture device unavailable or permission refused
    #[error("capture device denied: {0}")]
    DeviceDenied(String),

    /// Channel-level fault; no automatic reconnect
    #[error("transport error: {0}")]
    Transport(String),
}

impl SessionError {
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::DeviceDenied(_) => FailureReason::DeviceDenied,
            Self::Transport(_) => FailureReason::Transport,
        }
    }
}

/// Why a session ended up in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    DeviceDenied,
    Transport,
}

/// A single playback unit failed to render. Local and non-fatal.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("playback device error: {0}")]
    Device(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("decode error: {0}")]
    Decode(String),
}
