//! Float → signed 16-bit sample conversion for the uplink wire format.
//!
//! Scaling is asymmetric so both ends of `[-32768, 32767]` are reachable
//! without overflow: negative samples scale by 32768, the rest by 32767.

use bytes::{BufMut, Bytes, BytesMut};

/// Convert one sample. Out-of-range input is clamped; NaN becomes silence.
pub fn sample_to_fixed_point(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let s = f64::from(sample.clamp(-1.0, 1.0));
    if s < 0.0 {
        (s * 32768.0).round() as i16
    } else {
        (s * 32767.0).round() as i16
    }
}

/// Convert a block of float samples, one-to-one and order preserving.
pub fn to_fixed_point(samples: &[f32]) -> Vec<i16> {
    samples.iter().copied().map(sample_to_fixed_point).collect()
}

/// Convert a captured block straight into the little-endian uplink payload.
pub fn encode_frame(samples: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        buf.put_i16_le(sample_to_fixed_point(s));
    }
    buf.freeze()
}
