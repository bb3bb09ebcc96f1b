//! Turn-taking state machine.
//!
//! ```text
//! Idle -> Connecting -> Listening <-> Speaking -> Disconnected | Failed
//! ```
//!
//! The mute gate goes up synchronously when local playback starts and comes
//! down only after playback has been idle for the grace interval, at which
//! point the peer is told with an `unmute` control frame.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::audio::{
    AudioUplink, CaptureSource, MuteGate, Payload, PlaybackEvent, PlaybackQueue,
    QueueTransition, Renderer, UplinkStats,
};
use crate::config::{Config, DownlinkMode};
use crate::error::{FailureReason, SessionError};
use crate::net_link::{ChannelState, NetCommand, NetEvent, TransportChannel};
use crate::protocol::ControlMessage;
use crate::transcript_bridge::TranscriptSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Connecting,
    Listening,
    Speaking,
    Disconnected,
    Failed(FailureReason),
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed(_))
    }

    fn is_live(&self) -> bool {
        matches!(self, Self::Listening | Self::Speaking)
    }
}

#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub frame_size: usize,
    pub unmute_grace: Duration,
    pub downlink_mode: DownlinkMode,
}

impl From<&Config> for TurnSettings {
    fn from(config: &Config) -> Self {
        Self {
            frame_size: config.frame_size,
            unmute_grace: config.unmute_grace(),
            downlink_mode: config.downlink_mode,
        }
    }
}

/// Senders the coordinator hands to its components.
pub struct CoordinatorLinks {
    pub net_cmd: mpsc::Sender<NetCommand>,
    pub playback: mpsc::Sender<PlaybackEvent>,
    pub capture: mpsc::Sender<Vec<f32>>,
}

pub struct TurnCoordinator {
    session_id: Uuid,
    state: TurnState,
    settings: TurnSettings,
    gate: MuteGate,
    uplink: AudioUplink,
    queue: PlaybackQueue,
    transport: TransportChannel,
    transcript: Box<dyn TranscriptSink>,
    capture_tx: mpsc::Sender<Vec<f32>>,
    grace_deadline: Option<Instant>,
    failure: Option<SessionError>,
}

impl TurnCoordinator {
    pub fn new(
        settings: TurnSettings,
        capture: Box<dyn CaptureSource>,
        renderer: Arc<dyn Renderer>,
        transcript: Box<dyn TranscriptSink>,
        links: CoordinatorLinks,
    ) -> Self {
        let gate = MuteGate::new(true);
        Self {
            session_id: Uuid::new_v4(),
            state: TurnState::Idle,
            uplink: AudioUplink::new(capture, gate.clone(), settings.frame_size),
            queue: PlaybackQueue::new(renderer, links.playback),
            transport: TransportChannel::new(links.net_cmd),
            transcript,
            capture_tx: links.capture,
            grace_deadline: None,
            failure: None,
            settings,
            gate,
        }
    }

    /// Idle → Connecting. Acquires the capture device and returns the
    /// negotiated sample rate; a refused device fails the session.
    pub fn start(&mut self) -> Result<u32, SessionError> {
        match self.state {
            TurnState::Idle => {}
            TurnState::Disconnected | TurnState::Failed(_) => {
                return Err(self
                    .failure
                    .clone()
                    .unwrap_or_else(|| SessionError::Transport("session closed".into())));
            }
            _ => {
                if let Some(rate) = self.uplink.sample_rate() {
                    return Ok(rate);
                }
            }
        }

        match self.uplink.acquire() {
            Ok(rate) => {
                self.transport.set_state(ChannelState::Connecting);
                self.transition(TurnState::Connecting);
                Ok(rate)
            }
            Err(e) => {
                self.fail(e.clone());
                Err(e)
            }
        }
    }

    pub fn handle_net_event(&mut self, event: NetEvent) {
        if self.state.is_terminal() {
            return;
        }
        match event {
            NetEvent::Connected => self.on_open(),
            NetEvent::Text(text) => self.process_server_text(&text),
            NetEvent::Binary(data) => self.process_server_audio(data),
            NetEvent::Closed(reason) => {
                log::info!("Channel closed by peer: {:?}", reason);
                self.transport.set_state(ChannelState::Closed);
                self.teardown();
                self.transition(TurnState::Disconnected);
            }
            NetEvent::Error(e) => {
                self.transport.set_state(ChannelState::Failed);
                self.fail(SessionError::Transport(e));
            }
        }
    }

    pub fn handle_playback_event(&mut self, event: PlaybackEvent) {
        let PlaybackEvent::Finished { seq, outcome } = event;
        if self.state.is_terminal() {
            return;
        }
        if self.queue.on_unit_finished(seq, outcome) == Some(QueueTransition::Idle) {
            let deadline = Instant::now() + self.settings.unmute_grace;
            log::debug!("Playback idle, unmute in {:?}", self.settings.unmute_grace);
            self.grace_deadline = Some(deadline);
        }
    }

    /// Grace interval after playback went idle has run out: Speaking → Listening.
    pub fn on_grace_elapsed(&mut self) {
        if self.grace_deadline.take().is_none() || self.state != TurnState::Speaking {
            return;
        }
        self.gate.clear();
        self.transition(TurnState::Listening);
        if !self.transport.send_control(&ControlMessage::Unmute) {
            log::warn!("Unmute could not be sent, channel {:?}", self.transport.state());
        }
    }

    pub fn handle_capture_block(&mut self, block: Vec<f32>) {
        if self.state.is_live() {
            self.uplink.on_block(&block, &self.transport);
        }
    }

    /// User-initiated stop. Safe from any state, idempotent.
    pub fn stop(&mut self) {
        self.teardown();
        if !self.state.is_terminal() {
            self.transition(TurnState::Disconnected);
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_muted(&self) -> bool {
        self.gate.is_muted()
    }

    pub fn grace_deadline(&self) -> Option<Instant> {
        self.grace_deadline
    }

    pub fn failure(&self) -> Option<&SessionError> {
        self.failure.as_ref()
    }

    pub fn uplink_stats(&self) -> UplinkStats {
        self.uplink.stats()
    }

    pub fn is_playing(&self) -> bool {
        self.queue.is_busy()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.transport.state()
    }

    // Connecting → Listening
    fn on_open(&mut self) {
        if self.state != TurnState::Connecting {
            log::warn!("Unexpected channel open in state {:?}", self.state);
            return;
        }
        self.transport.set_state(ChannelState::Open);
        self.gate.clear();
        if let Err(e) = self.uplink.start(self.capture_tx.clone()) {
            self.fail(SessionError::DeviceDenied(format!("{:#}", e)));
            return;
        }
        self.transition(TurnState::Listening);
    }

    fn process_server_text(&mut self, text: &str) {
        let msg = match ControlMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Unhandled text frame ({}): {}", e, text);
                return;
            }
        };
        match msg {
            ControlMessage::Transcript { .. } | ControlMessage::Response { .. } => {
                self.transcript.show(&msg);
            }
            ControlMessage::Speak { text } => self.enqueue(Payload::Speech(text)),
            ControlMessage::Unmute => log::debug!("Ignoring downlink unmute"),
        }
    }

    fn process_server_audio(&mut self, data: Bytes) {
        match self.settings.downlink_mode {
            DownlinkMode::Audio => self.enqueue(Payload::Audio(data)),
            DownlinkMode::Speech => {
                log::warn!("Binary frame in speech mode, dropping {} bytes", data.len());
            }
        }
    }

    fn enqueue(&mut self, payload: Payload) {
        if !self.state.is_live() {
            return;
        }
        if self.queue.enqueue(payload) == Some(QueueTransition::Busy) {
            // Gate first: the very next capture block must see it
            self.gate.set();
            if self.grace_deadline.take().is_some() {
                log::debug!("Playback resumed during grace interval, unmute cancelled");
            }
            self.transition(TurnState::Speaking);
        }
    }

    fn fail(&mut self, error: SessionError) {
        log::error!("Session {} failed: {}", self.session_id, error);
        self.teardown();
        self.transition(TurnState::Failed(error.reason()));
        self.failure = Some(error);
    }

    // Capture, then transport, then playback; every step runs regardless of
    // the others and each is a no-op the second time.
    fn teardown(&mut self) {
        self.grace_deadline = None;
        self.gate.set();
        self.uplink.stop();
        self.transport.close();
        self.queue.reset();
    }

    fn transition(&mut self, next: TurnState) {
        if self.state != next {
            log::info!("Session {}: {:?} -> {:?}", self.session_id, self.state, next);
            self.state = next;
        }
    }
}
