use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{AudioDeviceError, AudioFrame, CaptureBackend, CaptureConfig};
use super::convert;

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples, normalized to [-1.0, 1.0]
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Int if spec.bits_per_sample <= 16 => {
                let raw = reader
                    .into_samples::<i16>()
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?;
                convert::i16_to_f32(&raw)
            }
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels.max(1) as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono samples at `target_rate`, ready for the capture pipeline
    pub fn to_mono(&self, target_rate: u32) -> Vec<f32> {
        let mono = convert::downmix_to_mono(&self.samples, self.channels);
        convert::resample(&mono, self.sample_rate, target_rate)
    }
}

/// Capture backend that plays a WAV file into the pipeline as if it were a microphone
///
/// Blocks are delivered at real-time pace. Once the file is exhausted the
/// backend keeps delivering silence until stopped, the way an idle
/// microphone would.
pub struct FileCaptureBackend {
    path: PathBuf,
    config: CaptureConfig,
    pump: Option<JoinHandle<()>>,
    capturing: bool,
}

impl FileCaptureBackend {
    pub fn new(path: PathBuf, config: CaptureConfig) -> Self {
        Self {
            path,
            config,
            pump: None,
            capturing: false,
        }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for FileCaptureBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AudioDeviceError> {
        if self.capturing {
            return Err(AudioDeviceError::Failed("Already capturing".to_string()));
        }

        let audio = AudioFile::open(&self.path)
            .map_err(|e| AudioDeviceError::Unavailable(format!("{:#}", e)))?;

        let sample_rate = self.config.target_sample_rate;
        let samples = audio.to_mono(sample_rate);
        let block = self.config.block_samples();
        let period = Duration::from_millis(self.config.buffer_duration_ms.max(1));
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let name = audio.path.clone();

        let pump = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut offset = 0usize;
            let mut timestamp_ms = 0u64;

            loop {
                ticker.tick().await;

                let frame_samples = if offset < samples.len() {
                    let end = (offset + block).min(samples.len());
                    let mut chunk = samples[offset..end].to_vec();
                    chunk.resize(block, 0.0);
                    offset = end;
                    if offset >= samples.len() {
                        info!("Reached end of {}, continuing with silence", name);
                    }
                    chunk
                } else {
                    vec![0.0; block]
                };

                let frame = AudioFrame {
                    samples: frame_samples,
                    sample_rate,
                    timestamp_ms,
                };
                timestamp_ms += period.as_millis() as u64;

                match tx.try_send(frame) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!("Capture consumer lagging, dropped block at {}ms", timestamp_ms);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }

            debug!("File capture pump ended");
        });

        self.pump = Some(pump);
        self.capturing = true;

        info!(
            "File capture started: {} ({}Hz, {}ms blocks)",
            self.path.display(),
            sample_rate,
            self.config.buffer_duration_ms
        );

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), AudioDeviceError> {
        if !self.capturing {
            return Ok(());
        }

        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.capturing = false;

        info!("File capture stopped: {}", self.path.display());

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}

impl Drop for FileCaptureBackend {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
