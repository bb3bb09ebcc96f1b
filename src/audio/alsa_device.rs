//! ALSA PCM setup shared by microphone capture and segment playback.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

/// What the hardware agreed to after negotiation.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    pub sample_rate: u32,
    pub channels: u32,
    /// Frames per period
    pub period_size: usize,
}

/// Requested stream shape. Rate is "near": the device may pick another.
#[derive(Debug, Clone, Copy)]
pub struct PcmSpec {
    direction: Direction,
    format: Format,
    sample_rate: u32,
    channels: u32,
}

impl PcmSpec {
    /// Mono float input; the uplink does its own fixed-point conversion.
    pub fn capture(sample_rate: u32) -> Self {
        Self {
            direction: Direction::Capture,
            format: Format::FloatLE,
            sample_rate,
            channels: 1,
        }
    }

    /// 16-bit output, upmixed by the caller to `channels`.
    pub fn playback(sample_rate: u32, channels: u32) -> Self {
        Self {
            direction: Direction::Playback,
            format: Format::S16LE,
            sample_rate,
            channels,
        }
    }

    fn label(&self) -> &'static str {
        match self.direction {
            Direction::Capture => "capture",
            Direction::Playback => "playback",
        }
    }

    /// Open `device` in blocking mode with interleaved access.
    pub fn open(&self, device: &str) -> Result<(PCM, AlsaParams)> {
        let pcm = PCM::new(device, self.direction, false)
            .with_context(|| format!("cannot open {} device '{}'", self.label(), device))?;

        {
            let hwp = HwParams::any(&pcm).context("no hardware configuration available")?;
            hwp.set_access(Access::RWInterleaved)?;
            hwp.set_format(self.format)?;
            hwp.set_channels(self.channels)?;
            hwp.set_rate_near(self.sample_rate, ValueOr::Nearest)?;
            pcm.hw_params(&hwp)
                .with_context(|| format!("{} device '{}' rejected parameters", self.label(), device))?;
        }

        let params = {
            let hwp = pcm.hw_params_current()?;
            AlsaParams {
                sample_rate: hwp.get_rate()?,
                channels: hwp.get_channels()?,
                period_size: hwp.get_period_size()? as usize,
            }
        };

        log::info!(
            "ALSA {} '{}' open: {:?}, requested {}Hz",
            self.label(),
            device,
            params,
            self.sample_rate
        );
        Ok((pcm, params))
    }
}
