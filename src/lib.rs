//! Half-duplex voice client: microphone audio goes up to a remote agent, the
//! agent's speech comes back down, and the two never overlap.

pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod net_link;
pub mod protocol;
pub mod session;
pub mod transcript_bridge;

pub use config::{Config, DownlinkMode};
pub use controller::{TurnCoordinator, TurnSettings, TurnState};
pub use error::{FailureReason, RenderError, SessionError};
pub use protocol::ControlMessage;
pub use session::{Session, SessionLinks, Step};
