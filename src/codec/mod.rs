//! Signal codec: raw float samples <-> wire transport encoding
//!
//! The model link carries audio as base64 of little-endian 16-bit PCM
//! in both directions. These conversions are pure and stateless; the
//! spectrum analyser used for level broadcasts lives in [`analyser`].

pub mod analyser;

pub use analyser::SpectrumAnalyser;

use crate::{MurmurError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// A decoded, playable block of audio
///
/// Channels are de-interleaved: `channels[c]` holds every sample of
/// channel `c` in time order.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioChunk {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Number of sample frames (per-channel sample count)
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, |c| c.len())
    }

    /// Playback duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// First channel, which is the whole signal for mono audio
    pub fn primary(&self) -> &[f32] {
        self.channels.first().map_or(&[], |c| c.as_slice())
    }
}

/// Encode float samples in [-1, 1] to the wire transport encoding
///
/// Scales to the signed 16-bit range, packs little-endian, then
/// base64-encodes. The caller guarantees the input range; out-of-range
/// values saturate at the i16 bounds.
pub fn encode_pcm(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample * 32768.0).round() as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// Decode a wire transport payload into a playable chunk
///
/// Inverse of [`encode_pcm`]: base64-decode, scale by 1/32768, and
/// de-interleave into `channels` when more than one.
pub fn decode_pcm(transport: &str, sample_rate: u32, channels: usize) -> Result<AudioChunk> {
    if channels == 0 {
        return Err(MurmurError::Decode("channel count must be positive".into()));
    }

    let bytes = BASE64
        .decode(transport)
        .map_err(|e| MurmurError::Decode(format!("invalid base64 payload: {e}")))?;

    let frame_bytes = channels * 2;
    if bytes.is_empty() || bytes.len() % frame_bytes != 0 {
        return Err(MurmurError::Decode(format!(
            "payload of {} bytes is not a positive multiple of {} ({} channels x 2 bytes)",
            bytes.len(),
            frame_bytes,
            channels
        )));
    }

    let frames = bytes.len() / frame_bytes;
    let mut out = vec![Vec::with_capacity(frames); channels];
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        out[i % channels].push(value as f32 / 32768.0);
    }

    Ok(AudioChunk {
        channels: out,
        sample_rate,
    })
}
