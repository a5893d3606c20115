use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::mpsc;

use super::codec::INPUT_SAMPLE_RATE;

/// Errors raised while acquiring or driving an audio device
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AudioDeviceError {
    /// The user or the platform refused access to the device
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// No usable device (missing hardware, missing file, unsupported format)
    #[error("device unavailable: {0}")]
    Unavailable(String),

    /// The device was acquired but failed while running
    #[error("device failure: {0}")]
    Failed(String),
}

/// Captured audio (mono, normalized floats at `sample_rate`)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Duration of this frame in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Configuration for capture backends
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Target sample rate (backends resample if needed)
    pub target_sample_rate: u32,
    /// Block size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
    /// Capacity of the frame channel handed out by `start`
    pub channel_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: INPUT_SAMPLE_RATE,
            buffer_duration_ms: 100,
            channel_capacity: 64,
        }
    }
}

impl CaptureConfig {
    /// Samples per delivered block
    pub fn block_samples(&self) -> usize {
        ((self.target_sample_rate as u64 * self.buffer_duration_ms) / 1000).max(1) as usize
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - File: stream a WAV file at real-time pace, then silence
/// - Microphone: cpal input device (`device` feature)
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Acquire the device and start capturing
    ///
    /// Returns a channel receiver that will receive audio frames. Acquiring a
    /// microphone is where a permission prompt would surface.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AudioDeviceError>;

    /// Stop capturing and release the device. Stopping twice is a no-op.
    async fn stop(&mut self) -> Result<(), AudioDeviceError>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Capture backend factory
pub struct CaptureBackendFactory;

impl CaptureBackendFactory {
    /// Create capture backend based on source and configuration
    pub fn create(
        source: &CaptureSource,
        config: CaptureConfig,
    ) -> Result<Box<dyn CaptureBackend>, AudioDeviceError> {
        match source {
            CaptureSource::Microphone => {
                #[cfg(feature = "device")]
                {
                    let backend = super::device::MicrophoneBackend::new(config);
                    Ok(Box::new(backend))
                }

                #[cfg(not(feature = "device"))]
                {
                    let _ = config;
                    Err(AudioDeviceError::Unavailable(
                        "microphone capture requires building with the `device` feature".to_string(),
                    ))
                }
            }

            CaptureSource::File(path) => {
                let backend = super::file::FileCaptureBackend::new(path.clone(), config);
                Ok(Box::new(backend))
            }
        }
    }
}

/// Where captured audio comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    /// Default input device
    Microphone,
    /// WAV file standing in for a microphone
    File(PathBuf),
}

impl CaptureSource {
    /// `None` selects the microphone, a path selects a WAV file
    pub fn from_path(path: Option<&str>) -> Self {
        match path {
            Some(p) if !p.trim().is_empty() => CaptureSource::File(PathBuf::from(p)),
            _ => CaptureSource::Microphone,
        }
    }
}
