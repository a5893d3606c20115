//! Capture pipeline: backend blocks in, fixed-size encoded frames out
//!
//! Backends deliver blocks of whatever size suits them. The pipeline regroups
//! them into frames of exactly `frame_size` samples, measures each frame's RMS
//! for the volume indicator, and encodes it for the wire.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioDeviceError, AudioFrame, CaptureBackend};
use super::codec::{self, EncodedAudioChunk};

/// Default samples per encoded frame (256 ms at 16 kHz)
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// One framed, measured, encoded slice of microphone audio
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// RMS amplitude of the frame, roughly [0, 1]
    pub volume: f32,
    pub chunk: EncodedAudioChunk,
}

/// Regroups arbitrarily sized blocks into fixed-size frames
#[derive(Debug)]
pub struct Framer {
    frame_size: usize,
    pending: Vec<f32>,
}

impl Framer {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size * 2),
        }
    }

    /// Add samples, returning every frame that is now complete
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            frames.push(self.pending.drain(..self.frame_size).collect());
        }
        frames
    }

    /// Samples waiting for the next frame
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

/// Measure and encode one frame
pub fn process_frame(samples: &[f32], sample_rate: u32) -> CapturedFrame {
    CapturedFrame {
        volume: codec::rms(samples),
        chunk: codec::encode_frame_at(samples, sample_rate),
    }
}

/// A running capture: owns the backend and the framing task
///
/// The consumer holds the receiver returned by [`Capture::start`]. Dropping
/// that receiver detaches the consumer immediately; [`Capture::stop`] then
/// releases the device.
pub struct Capture {
    backend: Option<Box<dyn CaptureBackend>>,
    pump: Option<JoinHandle<()>>,
    frame_size: usize,
}

impl Capture {
    /// Acquire the backend and start producing frames
    pub async fn start(
        mut backend: Box<dyn CaptureBackend>,
        frame_size: usize,
        capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<CapturedFrame>), AudioDeviceError> {
        let blocks = backend.start().await?;
        Ok(Self::attach(backend, blocks, frame_size, capacity))
    }

    /// Start framing an already acquired backend
    pub fn attach(
        backend: Box<dyn CaptureBackend>,
        mut blocks: mpsc::Receiver<AudioFrame>,
        frame_size: usize,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<CapturedFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let frame_size = frame_size.max(1);

        info!(
            "Capture started on {} ({} samples per frame)",
            backend.name(),
            frame_size
        );

        let pump = tokio::spawn(async move {
            let mut framer = Framer::new(frame_size);

            while let Some(block) = blocks.recv().await {
                let AudioFrame {
                    samples,
                    sample_rate,
                    ..
                } = block;

                for frame in framer.push(&samples) {
                    match tx.try_send(process_frame(&frame, sample_rate)) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            debug!("Frame consumer lagging, dropped a captured frame");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            debug!("Frame consumer detached, capture pump exiting");
                            return;
                        }
                    }
                }
            }

            debug!("Capture backend stream ended");
        });

        (
            Self {
                backend: Some(backend),
                pump: Some(pump),
                frame_size,
            },
            rx,
        )
    }

    /// Stop framing and release the device. Stopping twice is a no-op.
    pub async fn stop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        if let Some(mut backend) = self.backend.take() {
            // Best-effort release
            if let Err(e) = backend.stop().await {
                warn!("Error while stopping {}: {}", backend.name(), e);
            }
            info!("Capture stopped on {}", backend.name());
        }
    }

    pub fn is_active(&self) -> bool {
        self.backend.is_some()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
