// Sound-card backends built on cpal
//
// cpal streams are not `Send` on every platform, so each stream is created
// and owned by a dedicated thread. The async side only holds a stop signal
// and the shared timeline.

use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::backend::{AudioDeviceError, AudioFrame, CaptureBackend, CaptureConfig};
use super::codec::PlaybackChunk;
use super::convert;
use super::output::lock_timeline;
use super::playback::{PlaybackOutput, SourceId};
use super::timeline::Timeline;

/// Thread that owns a cpal stream until told to stop
struct StreamThread {
    stop_tx: Option<std_mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StreamThread {
    fn signal_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    async fn stop(&mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            if tokio::task::spawn_blocking(move || handle.join()).await.is_err() {
                debug!("Audio stream thread did not join cleanly");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

/// Regroups device callbacks into fixed blocks at the target rate
struct BlockSender {
    tx: mpsc::Sender<AudioFrame>,
    device_rate: u32,
    target_rate: u32,
    channels: u16,
    block: usize,
    pending: Vec<f32>,
    emitted: u64,
}

impl BlockSender {
    fn push(&mut self, interleaved: &[f32]) {
        let mono = convert::downmix_to_mono(interleaved, self.channels);
        let resampled = convert::resample(&mono, self.device_rate, self.target_rate);
        self.pending.extend_from_slice(&resampled);

        while self.pending.len() >= self.block {
            let samples: Vec<f32> = self.pending.drain(..self.block).collect();
            let timestamp_ms = self.emitted * 1000 / self.target_rate.max(1) as u64;
            self.emitted += samples.len() as u64;

            let frame = AudioFrame {
                samples,
                sample_rate: self.target_rate,
                timestamp_ms,
            };

            // Never block the audio thread
            if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(frame) {
                debug!("Capture consumer lagging, dropped microphone block");
            }
        }
    }
}

/// Default input device via cpal
pub struct MicrophoneBackend {
    config: CaptureConfig,
    thread: Option<StreamThread>,
    device_name: String,
}

impl MicrophoneBackend {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            thread: None,
            device_name: "microphone".to_string(),
        }
    }
}

fn build_input_stream(
    sender: BlockSender,
) -> Result<(cpal::Stream, String), AudioDeviceError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AudioDeviceError::Unavailable("no default input device".to_string()))?;
    let name = device.name().unwrap_or_else(|_| "unknown input".to_string());

    let supported = device
        .default_input_config()
        .map_err(|e| AudioDeviceError::PermissionDenied(e.to_string()))?;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();

    let mut sender = BlockSender {
        device_rate: stream_config.sample_rate.0,
        channels: stream_config.channels,
        ..sender
    };

    let err_fn = |e: cpal::StreamError| error!("Microphone stream error: {}", e);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| sender.push(data),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                sender.push(&convert::i16_to_f32(data))
            },
            err_fn,
            None,
        ),
        other => {
            return Err(AudioDeviceError::Unavailable(format!(
                "unsupported input sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| AudioDeviceError::PermissionDenied(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioDeviceError::PermissionDenied(e.to_string()))?;

    Ok((stream, name))
}

#[async_trait::async_trait]
impl CaptureBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AudioDeviceError> {
        if self.thread.is_some() {
            return Err(AudioDeviceError::Failed("Already capturing".to_string()));
        }

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let sender = BlockSender {
            tx,
            device_rate: self.config.target_sample_rate,
            target_rate: self.config.target_sample_rate,
            channels: 1,
            block: self.config.block_samples(),
            pending: Vec::new(),
            emitted: 0,
        };

        let handle = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(sender) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Blocks until stop is signalled or the backend is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioDeviceError::Failed(e.to_string()))?;

        let mut thread = StreamThread {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        };

        match ready_rx.await {
            Ok(Ok(name)) => {
                info!("Microphone capture started: {}", name);
                self.device_name = name;
                self.thread = Some(thread);
                Ok(rx)
            }
            Ok(Err(e)) => {
                thread.stop().await;
                Err(e)
            }
            Err(_) => {
                thread.stop().await;
                Err(AudioDeviceError::Failed(
                    "microphone thread exited during startup".to_string(),
                ))
            }
        }
    }

    async fn stop(&mut self) -> Result<(), AudioDeviceError> {
        if let Some(mut thread) = self.thread.take() {
            info!("Stopping microphone capture: {}", self.device_name);
            thread.stop().await;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    fn name(&self) -> &str {
        &self.device_name
    }
}

/// Default output device via cpal, scheduled through a shared timeline
pub struct SpeakerOutput {
    timeline: Arc<Mutex<Timeline>>,
    thread: Option<StreamThread>,
    name: String,
}

fn build_output_stream(
    completions: mpsc::UnboundedSender<SourceId>,
) -> Result<(cpal::Stream, Arc<Mutex<Timeline>>, String), AudioDeviceError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioDeviceError::Unavailable("no default output device".to_string()))?;
    let name = device.name().unwrap_or_else(|_| "unknown output".to_string());

    let supported = device
        .default_output_config()
        .map_err(|e| AudioDeviceError::Unavailable(e.to_string()))?;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();
    let channels = stream_config.channels;

    let timeline = Arc::new(Mutex::new(Timeline::new(stream_config.sample_rate.0)));
    let shared = Arc::clone(&timeline);
    let mut mono: Vec<f32> = Vec::new();
    let mut mixed: Vec<f32> = Vec::new();

    let mut render = move |frames: usize, out: &mut Vec<f32>| {
        mono.resize(frames, 0.0);
        let finished = lock_timeline(&shared).render(&mut mono);
        out.resize(frames * channels.max(1) as usize, 0.0);
        convert::upmix_from_mono(&mono, channels, out);
        for id in finished {
            let _ = completions.send(id);
        }
    };

    let err_fn = |e: cpal::StreamError| error!("Speaker stream error: {}", e);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                render(data.len() / channels.max(1) as usize, &mut mixed);
                data.copy_from_slice(&mixed[..data.len()]);
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                render(data.len() / channels.max(1) as usize, &mut mixed);
                for (slot, &sample) in data.iter_mut().zip(mixed.iter()) {
                    *slot = (sample * 32767.0) as i16;
                }
            },
            err_fn,
            None,
        ),
        other => {
            return Err(AudioDeviceError::Unavailable(format!(
                "unsupported output sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| AudioDeviceError::Unavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioDeviceError::Failed(e.to_string()))?;

    Ok((stream, timeline, name))
}

impl SpeakerOutput {
    pub async fn open(
        completions: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Self, AudioDeviceError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("speaker-playback".to_string())
            .spawn(move || {
                let stream = match build_output_stream(completions) {
                    Ok((stream, timeline, name)) => {
                        let _ = ready_tx.send(Ok((timeline, name)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioDeviceError::Failed(e.to_string()))?;

        let mut thread = StreamThread {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        };

        match ready_rx.await {
            Ok(Ok((timeline, name))) => {
                info!("Speaker output opened: {}", name);
                Ok(Self {
                    timeline,
                    thread: Some(thread),
                    name,
                })
            }
            Ok(Err(e)) => {
                thread.stop().await;
                Err(e)
            }
            Err(_) => {
                thread.stop().await;
                Err(AudioDeviceError::Failed(
                    "speaker thread exited during startup".to_string(),
                ))
            }
        }
    }
}

impl PlaybackOutput for SpeakerOutput {
    fn current_time(&self) -> f64 {
        lock_timeline(&self.timeline).now()
    }

    fn start_source(
        &mut self,
        id: SourceId,
        chunk: PlaybackChunk,
        start_at: f64,
    ) -> Result<(), AudioDeviceError> {
        if self.thread.is_none() {
            return Err(AudioDeviceError::Unavailable(format!("{} is closed", self.name)));
        }

        let mut timeline = lock_timeline(&self.timeline);
        let samples = convert::resample(&chunk.samples, chunk.sample_rate, timeline.sample_rate());
        timeline.add(id, samples, start_at);
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        lock_timeline(&self.timeline).remove(id);
    }

    fn close(&mut self) {
        if let Some(mut thread) = self.thread.take() {
            lock_timeline(&self.timeline).clear();
            thread.signal_stop();
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
