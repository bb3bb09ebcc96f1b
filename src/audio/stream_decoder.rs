//! Generic stream decoder trait for multi-format segment playback.

use anyhow::Result;

use super::opus_codec::OpusDecoder;

/// Converts one encoded downlink segment into mono i16 PCM at the segment
/// sample rate. Channel conversion for the device happens at playback.
pub trait StreamDecoder: Send {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>>;
}

/// Raw 16-bit signed little-endian mono, the same layout as the uplink.
pub struct Pcm16Decoder;

impl StreamDecoder for Pcm16Decoder {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>> {
        if data.len() % 2 != 0 {
            anyhow::bail!("odd PCM16 segment length: {}", data.len());
        }
        Ok(data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect())
    }
}

/// Factory function: create a decoder for the configured segment format.
pub fn create_decoder(format: &str, sample_rate: u32) -> Result<Box<dyn StreamDecoder>> {
    match format {
        "pcm16" => Ok(Box::new(Pcm16Decoder)),
        "opus" => Ok(Box::new(OpusDecoder::new(sample_rate)?)),
        other => anyhow::bail!("Unsupported stream format: {}", other),
    }
}
