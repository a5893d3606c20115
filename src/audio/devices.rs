use tokio::sync::mpsc;
use tracing::debug;

use super::backend::{
    AudioDeviceError, CaptureBackend, CaptureBackendFactory, CaptureConfig, CaptureSource,
};
use super::output::{OutputTarget, RenderedOutput};
use super::playback::{PlaybackOutput, SourceId};

/// Acquisition of the audio resources one session owns
///
/// The session controller never touches hardware directly; it asks this
/// trait for an output context and a capture backend on every connect.
#[async_trait::async_trait]
pub trait AudioDevices: Send + Sync {
    /// Open a playback output running at `sample_rate`
    ///
    /// Natural completion of each started source is reported on `completions`.
    async fn open_output(
        &self,
        sample_rate: u32,
        completions: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn PlaybackOutput>, AudioDeviceError>;

    /// Build (but do not start) a capture backend
    fn capture_backend(
        &self,
        config: CaptureConfig,
    ) -> Result<Box<dyn CaptureBackend>, AudioDeviceError>;
}

/// Devices selected from configuration
#[derive(Debug, Clone)]
pub struct DefaultAudioDevices {
    pub capture: CaptureSource,
    pub output: OutputTarget,
}

impl DefaultAudioDevices {
    pub fn new(capture: CaptureSource, output: OutputTarget) -> Self {
        Self { capture, output }
    }
}

#[async_trait::async_trait]
impl AudioDevices for DefaultAudioDevices {
    async fn open_output(
        &self,
        sample_rate: u32,
        completions: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn PlaybackOutput>, AudioDeviceError> {
        debug!("Opening playback output {:?}", self.output);

        match &self.output {
            OutputTarget::Device => {
                #[cfg(feature = "device")]
                {
                    let _ = sample_rate;
                    let output = super::device::SpeakerOutput::open(completions).await?;
                    Ok(Box::new(output))
                }

                #[cfg(not(feature = "device"))]
                {
                    let _ = (sample_rate, completions);
                    Err(AudioDeviceError::Unavailable(
                        "speaker output requires building with the `device` feature".to_string(),
                    ))
                }
            }
            OutputTarget::Null => Ok(Box::new(RenderedOutput::open(
                None,
                sample_rate,
                completions,
            )?)),
            OutputTarget::Wav(path) => Ok(Box::new(RenderedOutput::open(
                Some(path.clone()),
                sample_rate,
                completions,
            )?)),
        }
    }

    fn capture_backend(
        &self,
        config: CaptureConfig,
    ) -> Result<Box<dyn CaptureBackend>, AudioDeviceError> {
        CaptureBackendFactory::create(&self.capture, config)
    }
}
