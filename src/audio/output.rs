use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::AudioDeviceError;
use super::codec::PlaybackChunk;
use super::convert;
use super::playback::{PlaybackOutput, SourceId};
use super::timeline::Timeline;

/// Render period of the software clock
pub const RENDER_TICK: Duration = Duration::from_millis(20);

/// Where synthesized speech goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Default output device (`device` feature)
    Device,
    /// Software clock only, audio is discarded
    Null,
    /// Software clock, mixed audio written to a WAV file
    Wav(PathBuf),
}

impl OutputTarget {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "device" | "speaker" => OutputTarget::Device,
            "null" | "none" => OutputTarget::Null,
            path => OutputTarget::Wav(PathBuf::from(path)),
        }
    }
}

pub(crate) fn lock_timeline(timeline: &Mutex<Timeline>) -> MutexGuard<'_, Timeline> {
    timeline.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Playback output driven by a tokio ticker instead of a sound card
///
/// The clock advances in real time as the ticker renders the timeline; the
/// mixed signal is optionally written to a WAV file so a session can be
/// listened to afterwards.
pub struct RenderedOutput {
    timeline: Arc<Mutex<Timeline>>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    name: String,
}

impl RenderedOutput {
    pub fn open(
        wav_path: Option<PathBuf>,
        sample_rate: u32,
        completions: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Self, AudioDeviceError> {
        let writer = match &wav_path {
            Some(path) => {
                let spec = hound::WavSpec {
                    channels: 1,
                    sample_rate,
                    bits_per_sample: 16,
                    sample_format: hound::SampleFormat::Int,
                };
                let writer = hound::WavWriter::create(path, spec).map_err(|e| {
                    AudioDeviceError::Unavailable(format!(
                        "Failed to create WAV file {:?}: {}",
                        path, e
                    ))
                })?;
                Some(writer)
            }
            None => None,
        };

        let name = match &wav_path {
            Some(path) => format!("WAV renderer ({})", path.display()),
            None => "null renderer".to_string(),
        };

        let timeline = Arc::new(Mutex::new(Timeline::new(sample_rate)));
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(render_loop(
            Arc::clone(&timeline),
            writer,
            completions,
            stop_rx,
        ));

        info!("Opened {} at {}Hz", name, sample_rate);

        Ok(Self {
            timeline,
            stop_tx: Some(stop_tx),
            task: Some(task),
            name,
        })
    }
}

async fn render_loop(
    timeline: Arc<Mutex<Timeline>>,
    mut writer: Option<hound::WavWriter<BufWriter<File>>>,
    completions: mpsc::UnboundedSender<SourceId>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let block_len = {
        let timeline = lock_timeline(&timeline);
        (timeline.sample_rate() as u128 * RENDER_TICK.as_millis() / 1000) as usize
    };
    let mut block = vec![0.0f32; block_len.max(1)];
    let mut ticker = tokio::time::interval(RENDER_TICK);

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                let finished = lock_timeline(&timeline).render(&mut block);

                if let Some(w) = writer.as_mut() {
                    for &sample in &block {
                        let value = (sample * 32767.0) as i16;
                        if let Err(e) = w.write_sample(value) {
                            warn!("Failed to write rendered audio, disabling WAV output: {}", e);
                            writer = None;
                            break;
                        }
                    }
                }

                for id in finished {
                    // Receiver gone means the session was torn down
                    let _ = completions.send(id);
                }
            }
        }
    }

    if let Some(w) = writer.take() {
        if let Err(e) = w.finalize() {
            warn!("Failed to finalize rendered WAV: {}", e);
        }
    }

    debug!("Render loop ended");
}

impl PlaybackOutput for RenderedOutput {
    fn current_time(&self) -> f64 {
        lock_timeline(&self.timeline).now()
    }

    fn start_source(
        &mut self,
        id: SourceId,
        chunk: PlaybackChunk,
        start_at: f64,
    ) -> Result<(), AudioDeviceError> {
        if self.stop_tx.is_none() {
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
        if let Some(stop_tx) = self.stop_tx.take() {
            lock_timeline(&self.timeline).clear();
            // Task may already be gone
            let _ = stop_tx.send(());
        }
        // Detach: the render loop finalizes its writer on its own
        self.task.take();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for RenderedOutput {
    fn drop(&mut self) {
        self.close();
    }
}
