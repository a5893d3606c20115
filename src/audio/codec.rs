//! PCM wire codec
//!
//! Converts between normalized `f32` samples and the wire representation used
//! by the realtime service: little-endian 16-bit PCM, base64-wrapped for
//! transport.

use base64::Engine;
use thiserror::Error;

/// Sample rate of microphone audio sent to the service
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of synthesized speech received from the service
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Bytes per PCM16 sample
const SAMPLE_WIDTH: usize = 2;

/// Scale between normalized floats and i16
const PCM_SCALE: f32 = 32768.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(String),

    #[error("audio payload of {len} bytes is not a multiple of the {width}-byte frame width")]
    Misaligned { len: usize, width: usize },

    #[error("invalid audio format: {0}")]
    InvalidFormat(String),
}

/// Wire-format audio: PCM16 LE bytes plus their base64 text form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudioChunk {
    /// Raw little-endian PCM16 bytes
    pub pcm: Vec<u8>,
    /// Base64 encoding of `pcm`
    pub data: String,
    /// Sample rate of the encoded audio
    pub sample_rate: u32,
}

impl EncodedAudioChunk {
    /// MIME type announced to the service, e.g. `audio/pcm;rate=16000`
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Number of samples carried by this chunk
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / SAMPLE_WIDTH
    }
}

/// A decoded buffer ready to be scheduled on a playback output
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackChunk {
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl PlaybackChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Encode a microphone frame (16 kHz) for transport
pub fn encode_frame(samples: &[f32]) -> EncodedAudioChunk {
    encode_frame_at(samples, INPUT_SAMPLE_RATE)
}

/// Encode samples captured at an arbitrary rate
pub fn encode_frame_at(samples: &[f32], sample_rate: u32) -> EncodedAudioChunk {
    let pcm: Vec<u8> = samples
        .iter()
        .flat_map(|&s| sample_to_i16(s).to_le_bytes())
        .collect();

    let data = base64::engine::general_purpose::STANDARD.encode(&pcm);

    EncodedAudioChunk {
        pcm,
        data,
        sample_rate,
    }
}

/// Inverse of [`encode_frame`]: base64 text back to normalized samples
pub fn decode_frame(data: &str) -> Result<Vec<f32>, DecodeError> {
    let bytes = decode_base64(data)?;
    pcm16_to_f32(&bytes)
}

/// Decode a base64 payload into raw bytes
pub fn decode_base64(data: &str) -> Result<Vec<u8>, DecodeError> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| DecodeError::Base64(e.to_string()))
}

/// Interpret raw PCM16 LE bytes as a playable mono buffer
///
/// Interleaved multi-channel input is averaged down to mono.
pub fn decode_chunk(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<PlaybackChunk, DecodeError> {
    if sample_rate == 0 || channels == 0 {
        return Err(DecodeError::InvalidFormat(format!(
            "{}Hz, {} channels",
            sample_rate, channels
        )));
    }

    let width = SAMPLE_WIDTH * channels as usize;
    if bytes.len() % width != 0 {
        return Err(DecodeError::Misaligned {
            len: bytes.len(),
            width,
        });
    }

    let interleaved = pcm16_to_f32(bytes)?;
    let samples = super::convert::downmix_to_mono(&interleaved, channels);

    Ok(PlaybackChunk::new(samples, sample_rate))
}

/// Root-mean-square amplitude, used as the volume signal
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

fn pcm16_to_f32(bytes: &[u8]) -> Result<Vec<f32>, DecodeError> {
    if bytes.len() % SAMPLE_WIDTH != 0 {
        return Err(DecodeError::Misaligned {
            len: bytes.len(),
            width: SAMPLE_WIDTH,
        });
    }

    Ok(bytes
        .chunks_exact(SAMPLE_WIDTH)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM_SCALE)
        .collect())
}

fn sample_to_i16(sample: f32) -> i16 {
    // NaN clamps to 0
    let clamped = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };
    (clamped * PCM_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
