//! Microphone capture.
//!
//! Uses a dedicated std::thread (not a tokio task) for the blocking ALSA
//! reads. Blocks are handed to the session loop with `try_send`: if the loop
//! is behind, the block is dropped rather than queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use alsa::pcm::PCM;
use anyhow::Result;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::alsa_device::PcmSpec;
use crate::error::SessionError;

/// Upper bound on how long the capture thread goes without checking `running`.
const POLL_TIMEOUT_MS: u32 = 100;

/// A capture device delivering fixed-size mono float blocks.
pub trait CaptureSource: Send {
    /// Acquire the device. Returns the negotiated sample rate.
    fn open(&mut self) -> Result<u32, SessionError>;

    /// Begin delivering blocks of exactly `frame_size` samples.
    fn start(&mut self, frame_size: usize, blocks: mpsc::Sender<Vec<f32>>) -> Result<()>;

    /// Release the device. Safe to call in any state, any number of times.
    fn stop(&mut self);
}

pub struct AlsaCapture {
    device: String,
    requested_rate: u32,
    pcm: Option<PCM>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AlsaCapture {
    pub fn new(device: impl Into<String>, requested_rate: u32) -> Self {
        Self {
            device: device.into(),
            requested_rate,
            pcm: None,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl CaptureSource for AlsaCapture {
    fn open(&mut self) -> Result<u32, SessionError> {
        let (pcm, params) = PcmSpec::capture(self.requested_rate)
            .open(&self.device)
            .map_err(|e| SessionError::DeviceDenied(format!("{:#}", e)))?;
        self.pcm = Some(pcm);
        Ok(params.sample_rate)
    }

    fn start(&mut self, frame_size: usize, blocks: mpsc::Sender<Vec<f32>>) -> Result<()> {
        if frame_size == 0 {
            anyhow::bail!("capture frame size must be > 0");
        }
        let Some(pcm) = self.pcm.take() else {
            anyhow::bail!("capture device not open");
        };
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                if let Err(e) = capture_thread(pcm, frame_size, blocks, &running) {
                    log::error!("Capture thread error: {}", e);
                }
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            join_off_loop(h);
        }
        // Opened but never started
        self.pcm.take();
    }
}

impl Drop for AlsaCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The capture thread exits within one `POLL_TIMEOUT_MS` of `running` going
/// false. Inside a runtime, wait for it on the blocking pool so the session
/// loop never stalls on a device read.
fn join_off_loop(handle: JoinHandle<()>) {
    match tokio::runtime::Handle::try_current() {
        Ok(rt) => {
            rt.spawn_blocking(move || {
                if handle.join().is_err() {
                    log::warn!("Capture thread panicked");
                }
            });
        }
        Err(_) => {
            let _ = handle.join();
        }
    }
}

fn capture_thread(
    pcm: PCM,
    frame_size: usize,
    blocks: mpsc::Sender<Vec<f32>>,
    running: &AtomicBool,
) -> Result<()> {
    let period_size = pcm.hw_params_current()?.get_period_size()? as usize;
    let io = pcm.io_f32()?;
    let mut read_buf = vec![0f32; period_size];
    let mut accum = Blocker::new(frame_size);

    // Polling needs a running stream; a prepared one never becomes readable
    pcm.start()?;
    log::info!("Capture started: period={}, frame_size={}", period_size, frame_size);

    while running.load(Ordering::Relaxed) {
        match pcm.wait(Some(POLL_TIMEOUT_MS)) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                log::warn!("ALSA capture wait error: {}, recovering...", e);
                if !recover(&pcm) {
                    break;
                }
                continue;
            }
        }
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                for block in accum.push(&read_buf[..frames]) {
                    match blocks.try_send(block) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            log::trace!("Session loop busy, capture block dropped");
                        }
                        Err(TrySendError::Closed(_)) => {
                            log::info!("Capture receiver dropped");
                            return Ok(());
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if !recover(&pcm) {
                    break;
                }
            }
        }
    }

    log::info!("Capture stopped");
    Ok(())
}

fn recover(pcm: &PCM) -> bool {
    match pcm.prepare().and_then(|()| pcm.start()) {
        Ok(()) => true,
        Err(e) => {
            log::error!("Failed to recover PCM capture: {}", e);
            false
        }
    }
}

/// Re-slices arbitrary period reads into fixed-size blocks.
struct Blocker {
    frame_size: usize,
    pending: Vec<f32>,
}

impl Blocker {
    fn new(frame_size: usize) -> Self {
        // Zero would never complete a block
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    fn push(&mut self, mut samples: &[f32]) -> Vec<Vec<f32>> {
        let mut out = Vec::new();
        while !samples.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];
            if self.pending.len() == self.frame_size {
                out.push(std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.frame_size),
                ));
            }
        }
        out
    }
}
