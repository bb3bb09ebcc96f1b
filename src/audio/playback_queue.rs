//! Strictly serialized, FIFO rendering of downlink playback units.
//!
//! At most one unit renders at a time. Rendering runs in its own tokio task
//! and reports back through [`PlaybackEvent::Finished`]; the owner feeds that
//! event into [`PlaybackQueue::on_unit_finished`] from the session loop.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::RenderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Text to synthesize locally
    Speech(String),
    /// Encoded audio segment received from the peer
    Audio(Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackUnit {
    /// Arrival order
    pub seq: u64,
    pub payload: Payload,
}

/// Renders one unit to completion. Dropping the future must stop playback.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, unit: &PlaybackUnit) -> Result<(), RenderError>;
}

#[derive(Debug)]
pub enum PlaybackEvent {
    Finished {
        seq: u64,
        outcome: Result<(), RenderError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueTransition {
    /// First unit of a cycle started rendering
    Busy,
    /// Last unit finished and nothing is waiting
    Idle,
}

struct ActiveRender {
    seq: u64,
    handle: JoinHandle<()>,
}

pub struct PlaybackQueue {
    renderer: Arc<dyn Renderer>,
    events: mpsc::Sender<PlaybackEvent>,
    pending: VecDeque<PlaybackUnit>,
    active: Option<ActiveRender>,
    next_seq: u64,
}

impl PlaybackQueue {
    pub fn new(renderer: Arc<dyn Renderer>, events: mpsc::Sender<PlaybackEvent>) -> Self {
        Self {
            renderer,
            events,
            pending: VecDeque::new(),
            active: None,
            next_seq: 0,
        }
    }

    /// Append to the tail. Starts rendering right away if nothing is active.
    pub fn enqueue(&mut self, payload: Payload) -> Option<QueueTransition> {
        let unit = PlaybackUnit {
            seq: self.next_seq,
            payload,
        };
        self.next_seq += 1;
        log::debug!("Enqueue playback unit #{}", unit.seq);
        self.pending.push_back(unit);

        if self.active.is_none() && self.promote() {
            Some(QueueTransition::Busy)
        } else {
            None
        }
    }

    /// Completion (success or error) of the active unit.
    ///
    /// Returns `Idle` exactly once when the queue drains. Completions for a
    /// unit that is no longer active (cancelled by `reset`) are ignored.
    pub fn on_unit_finished(
        &mut self,
        seq: u64,
        outcome: Result<(), RenderError>,
    ) -> Option<QueueTransition> {
        match &self.active {
            Some(active) if active.seq == seq => {}
            _ => {
                log::debug!("Ignoring stale completion for unit #{}", seq);
                return None;
            }
        }
        self.active = None;

        match outcome {
            Ok(()) => log::debug!("Playback unit #{} finished", seq),
            Err(e) => log::warn!("Playback unit #{} failed: {}", seq, e),
        }

        if self.promote() {
            None
        } else {
            Some(QueueTransition::Idle)
        }
    }

    /// Cancel the in-flight render and discard everything queued, silently.
    pub fn reset(&mut self) {
        if let Some(active) = self.active.take() {
            log::debug!("Cancelling playback unit #{}", active.seq);
            active.handle.abort();
        }
        self.pending.clear();
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    /// Units waiting behind the active one.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn promote(&mut self) -> bool {
        let Some(unit) = self.pending.pop_front() else {
            return false;
        };
        let seq = unit.seq;
        let renderer = self.renderer.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let outcome = renderer.render(&unit).await;
            let _ = events.send(PlaybackEvent::Finished { seq, outcome }).await;
        });
        self.active = Some(ActiveRender { seq, handle });
        true
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.reset();
    }
}
