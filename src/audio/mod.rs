//! audio - capture, conversion and playback for the voice session
//!
//! Uses ALSA for audio I/O, Opus for downlink segment decoding and an
//! external synthesizer process for local speech.

mod alsa_device;
pub mod capture;
pub mod convert;
mod opus_codec;
pub mod play;
pub mod playback_queue;
pub mod renderer;
pub mod speech;
pub mod stream_decoder;
pub mod uplink;

pub use capture::{AlsaCapture, CaptureSource};
pub use playback_queue::{
    Payload, PlaybackEvent, PlaybackQueue, PlaybackUnit, QueueTransition, Renderer,
};
pub use renderer::LocalRenderer;
pub use stream_decoder::StreamDecoder;
pub use uplink::{AudioUplink, MuteGate, UplinkStats};
