use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;

use super::alsa_device::PcmSpec;
use super::stream_decoder::create_decoder;
use crate::error::RenderError;

/// Give up on a segment after this many consecutive XRUN recoveries.
const MAX_RECOVERY_RETRIES: u32 = 3;

/// Plays one encoded downlink segment to completion on the ALSA device.
#[derive(Debug, Clone)]
pub struct SegmentPlayer {
    pub device: String,
    pub channels: u32,
    pub sample_rate: u32,
    pub format: String,
}

/// Sets the flag when the owning render future is dropped.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl SegmentPlayer {
    pub async fn play(&self, data: Bytes) -> Result<(), RenderError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(cancelled.clone());
        let player = self.clone();
        tokio::task::spawn_blocking(move || player.play_blocking(&data, &cancelled))
            .await
            .map_err(|e| RenderError::Device(format!("playback task failed: {}", e)))?
    }

    fn play_blocking(&self, data: &[u8], cancelled: &AtomicBool) -> Result<(), RenderError> {
        let mut decoder = create_decoder(&self.format, self.sample_rate)
            .map_err(|e| RenderError::Decode(e.to_string()))?;
        let mono = decoder
            .decode(data)
            .map_err(|e| RenderError::Decode(e.to_string()))?;
        if mono.is_empty() {
            return Err(RenderError::InvalidPayload("empty audio segment".into()));
        }

        let (pcm, params) = PcmSpec::playback(self.sample_rate, self.channels)
            .open(&self.device)
            .map_err(|e| RenderError::Device(format!("{:#}", e)))?;
        if params.sample_rate != self.sample_rate {
            log::warn!(
                "Playback device runs at {}Hz, segment is {}Hz",
                params.sample_rate,
                self.sample_rate
            );
        }

        let channels = params.channels as usize;
        let interleaved = upmix(&mono, channels);
        let io = pcm.io_i16().map_err(|e| RenderError::Device(e.to_string()))?;

        // Write one period at a time so cancellation is noticed promptly
        let chunk_frames = params.period_size.max(1);
        let total_frames = mono.len();
        let mut frames_written = 0;
        let mut retry_count = 0u32;

        while frames_written < total_frames {
            if cancelled.load(Ordering::SeqCst) {
                log::debug!("Segment playback cancelled");
                let _ = pcm.drop();
                return Ok(());
            }
            let end = (frames_written + chunk_frames).min(total_frames);
            match io.writei(&interleaved[frames_written * channels..end * channels]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = pcm.prepare() {
                        return Err(RenderError::Device(format!(
                            "failed to recover PCM playback: {}",
                            e2
                        )));
                    }
                    if retry_count >= MAX_RECOVERY_RETRIES {
                        return Err(RenderError::Device(format!(
                            "max recovery retries reached, {} frames unwritten",
                            total_frames - frames_written
                        )));
                    }
                }
            }
        }

        match finish_action(cancelled) {
            Finish::Drain => pcm.drain().map_err(|e| RenderError::Device(e.to_string()))?,
            Finish::Discard => {
                log::debug!("Segment playback cancelled, discarding buffered tail");
                let _ = pcm.drop();
                return Ok(());
            }
        }
        log::debug!("Segment played: {} frames", total_frames);
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Finish {
    /// Let the buffered tail play out
    Drain,
    /// Stop now, dropping whatever the device still holds
    Discard,
}

fn finish_action(cancelled: &AtomicBool) -> Finish {
    if cancelled.load(Ordering::SeqCst) {
        Finish::Discard
    } else {
        Finish::Drain
    }
}

/// Duplicate mono samples across every device channel.
fn upmix(mono: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return mono.to_vec();
    }
    let mut out = Vec::with_capacity(mono.len() * channels);
    for &s in mono {
        out.extend(std::iter::repeat_n(s, channels));
    }
    out
}
