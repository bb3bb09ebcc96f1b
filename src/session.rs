//! The session event loop.
//!
//! One task owns the [`TurnCoordinator`] and feeds it every event in turn:
//! channel events, render completions, the unmute grace deadline and capture
//! blocks. Nothing else touches session state, so no locking is needed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

use crate::audio::{CaptureSource, PlaybackEvent, Renderer};
use crate::controller::{CoordinatorLinks, TurnCoordinator, TurnSettings};
use crate::error::SessionError;
use crate::net_link::{NetCommand, NetEvent};
use crate::transcript_bridge::TranscriptSink;

const CHANNEL_CAPACITY: usize = 100;

/// At most one capture block waits for the loop; later ones are dropped.
const CAPTURE_CAPACITY: usize = 1;

/// The network side of a session, handed to the `NetLink` task.
pub struct SessionLinks {
    pub net_events: mpsc::Sender<NetEvent>,
    pub net_commands: mpsc::Receiver<NetCommand>,
}

#[derive(Debug)]
pub enum Step {
    Continue,
    Ended(Result<(), SessionError>),
}

pub struct Session {
    coordinator: TurnCoordinator,
    net_rx: mpsc::Receiver<NetEvent>,
    playback_rx: mpsc::Receiver<PlaybackEvent>,
    capture_rx: mpsc::Receiver<Vec<f32>>,
}

impl Session {
    pub fn new(
        settings: TurnSettings,
        capture: Box<dyn CaptureSource>,
        renderer: Arc<dyn Renderer>,
        transcript: Box<dyn TranscriptSink>,
    ) -> (Self, SessionLinks) {
        let (net_event_tx, net_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (net_cmd_tx, net_cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (playback_tx, playback_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (capture_tx, capture_rx) = mpsc::channel(CAPTURE_CAPACITY);

        let coordinator = TurnCoordinator::new(
            settings,
            capture,
            renderer,
            transcript,
            CoordinatorLinks {
                net_cmd: net_cmd_tx,
                playback: playback_tx,
                capture: capture_tx,
            },
        );

        let session = Self {
            coordinator,
            net_rx,
            playback_rx,
            capture_rx,
        };
        let links = SessionLinks {
            net_events: net_event_tx,
            net_commands: net_cmd_rx,
        };
        (session, links)
    }

    /// Acquire the capture device. Returns the sample rate to announce.
    pub fn start(&mut self) -> Result<u32, SessionError> {
        self.coordinator.start()
    }

    /// Wait for the next event and dispatch it.
    pub async fn step(&mut self) -> Step {
        if self.coordinator.state().is_terminal() {
            return Step::Ended(self.outcome());
        }

        let grace = self.coordinator.grace_deadline();
        tokio::select! {
            biased;

            Some(event) = self.net_rx.recv() => {
                self.coordinator.handle_net_event(event);
            }
            Some(event) = self.playback_rx.recv() => {
                self.coordinator.handle_playback_event(event);
            }
            _ = sleep_until(grace.unwrap_or_else(Instant::now)), if grace.is_some() => {
                self.coordinator.on_grace_elapsed();
            }
            Some(block) = self.capture_rx.recv() => {
                self.coordinator.handle_capture_block(block);
            }
            else => {
                // Every source is gone; nothing can ever wake us again
                self.coordinator.handle_net_event(NetEvent::Closed(None));
            }
        }

        if self.coordinator.state().is_terminal() {
            Step::Ended(self.outcome())
        } else {
            Step::Continue
        }
    }

    /// Drive the session until the channel closes or fails.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        loop {
            if let Step::Ended(outcome) = self.step().await {
                return outcome;
            }
        }
    }

    pub fn stop(&mut self) {
        self.coordinator.stop();
    }

    pub fn coordinator(&self) -> &TurnCoordinator {
        &self.coordinator
    }

    fn outcome(&self) -> Result<(), SessionError> {
        match self.coordinator.failure() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
