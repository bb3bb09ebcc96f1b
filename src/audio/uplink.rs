//! Capture → convert → transmit, behind the mute gate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tokio::sync::mpsc;

use super::capture::CaptureSource;
use super::convert;
use crate::error::SessionError;
use crate::net_link::TransportChannel;

/// Suppresses uplink transmission while set.
///
/// Written only by the turn coordinator, read by the uplink once per block.
#[derive(Debug, Clone)]
pub struct MuteGate(Arc<AtomicBool>);

impl MuteGate {
    pub fn new(muted: bool) -> Self {
        Self(Arc::new(AtomicBool::new(muted)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UplinkStats {
    pub sent: u64,
    pub muted: u64,
    pub dropped: u64,
}

pub struct AudioUplink {
    capture: Box<dyn CaptureSource>,
    gate: MuteGate,
    frame_size: usize,
    sample_rate: Option<u32>,
    streaming: bool,
    stats: UplinkStats,
}

impl AudioUplink {
    pub fn new(capture: Box<dyn CaptureSource>, gate: MuteGate, frame_size: usize) -> Self {
        Self {
            capture,
            gate,
            frame_size,
            sample_rate: None,
            streaming: false,
            stats: UplinkStats::default(),
        }
    }

    /// Acquire the capture device without streaming yet.
    pub fn acquire(&mut self) -> Result<u32, SessionError> {
        let rate = self.capture.open()?;
        self.sample_rate = Some(rate);
        Ok(rate)
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    pub fn start(&mut self, blocks: mpsc::Sender<Vec<f32>>) -> Result<()> {
        if self.streaming {
            return Ok(());
        }
        if self.frame_size == 0 {
            anyhow::bail!("uplink frame size must be > 0");
        }
        self.capture.start(self.frame_size, blocks)?;
        self.streaming = true;
        log::info!(
            "Uplink started: rate={:?}, frame_size={}",
            self.sample_rate,
            self.frame_size
        );
        Ok(())
    }

    /// Per-block capture handler. The gate is read here every time, never cached.
    pub fn on_block(&mut self, block: &[f32], transport: &TransportChannel) {
        if !self.streaming {
            return;
        }
        if self.gate.is_muted() {
            self.stats.muted += 1;
            return;
        }
        if transport.send_binary(convert::encode_frame(block)) {
            self.stats.sent += 1;
        } else {
            self.stats.dropped += 1;
        }
    }

    /// Release the capture device. Idempotent.
    pub fn stop(&mut self) {
        self.capture.stop();
        if self.streaming {
            self.streaming = false;
            log::info!(
                "Uplink stopped: sent={}, muted={}, dropped={}",
                self.stats.sent,
                self.stats.muted,
                self.stats.dropped
            );
        }
        self.sample_rate = None;
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn stats(&self) -> UplinkStats {
        self.stats
    }
}
