//! Opus decoding for downlink audio segments.
//!
//! A segment is a single Opus packet at one of the Opus native rates
//! (8/12/16/24/48 kHz), decoded to mono. The playback device is opened
//! at the same rate, so no resampling happens here.

use anyhow::Result;

use super::stream_decoder::StreamDecoder;

/// 120ms @ 48kHz is the largest Opus frame; leave headroom.
const MAX_FRAME_SAMPLES: usize = 6000;

pub struct OpusDecoder {
    decoder: opus::Decoder,
}

impl OpusDecoder {
    pub fn new(sample_rate: u32) -> Result<Self> {
        let decoder = opus::Decoder::new(sample_rate, opus::Channels::Mono)?;
        Ok(Self { decoder })
    }

    pub fn decode(&mut self, opus_data: &[u8]) -> Result<Vec<i16>> {
        let mut pcm_buf = vec![0i16; MAX_FRAME_SAMPLES];
        let decoded = self.decoder.decode(opus_data, &mut pcm_buf, false)?;
        pcm_buf.truncate(decoded);
        Ok(pcm_buf)
    }
}

impl StreamDecoder for OpusDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>> {
        OpusDecoder::decode(self, data)
    }
}
