//! Session controller
//!
//! One worker task owns every session resource: the capture pipeline, the
//! playback scheduler, the remote handle and the transcript fragments. The
//! public [`SessionController`] only sends commands to it and reads the
//! published state.
//!
//! Connect attempts run in their own task because they suspend on device
//! acquisition and the remote handshake. Each attempt carries a generation
//! number; `disconnect` and every new `connect` bump the generation and cancel
//! the running attempt, which releases what it acquired. A late outcome can
//! never resurrect a session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tracing::{debug, error, info, warn};

use super::channel::SessionChannel;
use super::config::{ApiKey, RoleConfig, SessionSettings};
use super::error::SessionError;
use super::state::{
    ConnectionState, SessionStats, SessionStatus, TranscriptEntry, TranscriptRole,
};
use crate::audio::backend::{AudioFrame, CaptureBackend, CaptureConfig};
use crate::audio::capture::{Capture, CapturedFrame};
use crate::audio::codec;
use crate::audio::devices::AudioDevices;
use crate::audio::playback::{PlaybackScheduler, SourceId};
use crate::realtime::{RealtimeLink, RealtimeTransport, ServerEvent};

const COMMAND_QUEUE: usize = 32;

/// Capacity of the backend block queue handed to capture backends
const CAPTURE_BLOCK_QUEUE: usize = 64;

enum Command {
    Connect {
        role: RoleConfig,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    SendText {
        text: String,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<SessionStats>,
    },
}

/// Resources acquired by a successful attempt
struct Acquired {
    scheduler: PlaybackScheduler,
    completions: mpsc::UnboundedReceiver<SourceId>,
    mic: Box<dyn CaptureBackend>,
    blocks: mpsc::Receiver<AudioFrame>,
    link: RealtimeLink,
}

impl Acquired {
    /// Release everything, in capture, playback, remote order
    async fn release(mut self) {
        drop(self.blocks);
        if let Err(e) = self.mic.stop().await {
            debug!("Ignoring capture release error: {}", e);
        }
        self.scheduler.teardown();
        let (sender, _events) = self.link.into_parts();
        sender.close();
    }
}

struct AttemptOutcome {
    generation: u64,
    result: Result<Acquired, SessionError>,
}

struct Attempt {
    generation: u64,
    role: RoleConfig,
    /// Firing or dropping this makes `establish` release what it holds and give up
    cancel: Option<oneshot::Sender<()>>,
    reply: Option<oneshot::Sender<Result<(), SessionError>>>,
}

/// Release a partially established session in reverse acquisition order
async fn release_partial(
    mut scheduler: PlaybackScheduler,
    mic: Option<(Box<dyn CaptureBackend>, Option<mpsc::Receiver<AudioFrame>>)>,
) {
    if let Some((mut mic, blocks)) = mic {
        drop(blocks);
        if let Err(e) = mic.stop().await {
            debug!("Ignoring capture release error: {}", e);
        }
    }
    scheduler.teardown();
}

/// Acquire output, microphone and remote session, in that order
///
/// On failure or cancellation everything acquired so far is released before
/// returning.
async fn establish(
    settings: SessionSettings,
    api_key: ApiKey,
    transport: Arc<dyn RealtimeTransport>,
    devices: Arc<dyn AudioDevices>,
    mut cancel: oneshot::Receiver<()>,
) -> Result<Acquired, SessionError> {
    let (completion_tx, completions) = mpsc::unbounded_channel();
    let output = tokio::select! {
        _ = &mut cancel => return Err(SessionError::Cancelled),
        output = devices.open_output(settings.output_sample_rate, completion_tx) => output?,
    };
    let scheduler = PlaybackScheduler::new(output);

    let capture_config = CaptureConfig {
        target_sample_rate: settings.input_sample_rate,
        buffer_duration_ms: settings.capture_buffer_ms,
        channel_capacity: CAPTURE_BLOCK_QUEUE,
    };

    let mut mic = match devices.capture_backend(capture_config) {
        Ok(mic) => mic,
        Err(e) => {
            release_partial(scheduler, None).await;
            return Err(e.into());
        }
    };

    let started = tokio::select! {
        _ = &mut cancel => None,
        started = mic.start() => Some(started),
    };
    let blocks = match started {
        Some(Ok(blocks)) => blocks,
        Some(Err(e)) => {
            release_partial(scheduler, None).await;
            return Err(e.into());
        }
        None => {
            // Start was interrupted midway; stop is a no-op if nothing started
            release_partial(scheduler, Some((mic, None))).await;
            return Err(SessionError::Cancelled);
        }
    };

    let live_config = settings.live_config();
    let connected = tokio::select! {
        _ = &mut cancel => None,
        link = transport.connect(&api_key, &live_config) => Some(link),
    };
    let link = match connected {
        Some(Ok(link)) => link,
        Some(Err(e)) => {
            release_partial(scheduler, Some((mic, Some(blocks)))).await;
            return Err(e.into());
        }
        None => {
            release_partial(scheduler, Some((mic, Some(blocks)))).await;
            return Err(SessionError::Cancelled);
        }
    };

    Ok(Acquired {
        scheduler,
        completions,
        mic,
        blocks,
        link,
    })
}

async fn recv_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_opt_unbounded<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

struct Worker {
    settings: SessionSettings,
    transport: Arc<dyn RealtimeTransport>,
    devices: Arc<dyn AudioDevices>,

    status_tx: watch::Sender<SessionStatus>,
    volume_tx: watch::Sender<f32>,
    transcript: Arc<RwLock<Vec<TranscriptEntry>>>,

    generation: u64,
    attempt: Option<Attempt>,
    outcome_tx: mpsc::UnboundedSender<AttemptOutcome>,

    channel: SessionChannel,
    capture: Option<Capture>,
    frames: Option<mpsc::Receiver<CapturedFrame>>,
    events: Option<mpsc::Receiver<ServerEvent>>,
    scheduler: Option<PlaybackScheduler>,
    completions: Option<mpsc::UnboundedReceiver<SourceId>>,

    pending_input: String,
    pending_output: String,

    started_at: Option<DateTime<Utc>>,
    chunks_scheduled: u64,
    chunks_rejected: u64,
    last_cursor: f64,
}

impl Worker {
    fn new(
        settings: SessionSettings,
        transport: Arc<dyn RealtimeTransport>,
        devices: Arc<dyn AudioDevices>,
        status_tx: watch::Sender<SessionStatus>,
        volume_tx: watch::Sender<f32>,
        transcript: Arc<RwLock<Vec<TranscriptEntry>>>,
        outcome_tx: mpsc::UnboundedSender<AttemptOutcome>,
    ) -> Self {
        Self {
            settings,
            transport,
            devices,
            status_tx,
            volume_tx,
            transcript,
            generation: 0,
            attempt: None,
            outcome_tx,
            channel: SessionChannel::new(),
            capture: None,
            frames: None,
            events: None,
            scheduler: None,
            completions: None,
            pending_input: String::new(),
            pending_output: String::new(),
            started_at: None,
            chunks_scheduled: 0,
            chunks_rejected: 0,
            last_cursor: 0.0,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut outcomes: mpsc::UnboundedReceiver<AttemptOutcome>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },

                Some(outcome) = outcomes.recv() => self.apply_outcome(outcome).await,

                frame = recv_opt(&mut self.frames) => match frame {
                    Some(frame) => self.on_frame(frame),
                    None => {
                        warn!("Capture stream ended");
                        self.frames = None;
                    }
                },

                event = recv_opt(&mut self.events) => {
                    let event = event.unwrap_or_else(|| ServerEvent::Closed {
                        reason: "realtime link ended".to_string(),
                    });
                    self.on_server_event(event).await;
                }

                done = recv_opt_unbounded(&mut self.completions) => match done {
                    Some(id) => {
                        if let Some(scheduler) = self.scheduler.as_mut() {
                            scheduler.source_ended(id);
                        }
                    }
                    None => self.completions = None,
                },
            }
        }

        debug!("Session controller dropped, shutting down worker");
        self.cancel_attempt();
        self.release_resources().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { role, reply } => self.connect(role, reply).await,
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::SendText { text, reply } => {
                let dispatched = self.send_text(&text).await;
                let _ = reply.send(dispatched);
            }
            Command::Stats { reply } => {
                let stats = self.stats().await;
                let _ = reply.send(stats);
            }
        }
    }

    async fn connect(
        &mut self,
        role: RoleConfig,
        reply: oneshot::Sender<Result<(), SessionError>>,
    ) {
        // Only one live attempt: tear the previous one down completely first
        self.cancel_attempt();
        self.release_resources().await;

        self.generation += 1;
        self.channel.begin();
        self.channel.reset_counters();
        self.chunks_scheduled = 0;
        self.chunks_rejected = 0;
        self.last_cursor = 0.0;
        self.publish(ConnectionState::Connecting, None);

        let Some(api_key) = self.settings.credentials.api_key().cloned() else {
            let err = SessionError::missing_credential();
            self.fail(&err);
            let _ = reply.send(Err(err));
            return;
        };

        info!(
            "Connecting interview session for {} ({}), attempt {}",
            role.role, role.level, self.generation
        );

        let generation = self.generation;
        let settings = self.settings.clone();
        let transport = Arc::clone(&self.transport);
        let devices = Arc::clone(&self.devices);
        let outcome_tx = self.outcome_tx.clone();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = establish(settings, api_key, transport, devices, cancel_rx).await;
            if let Err(mpsc::error::SendError(outcome)) =
                outcome_tx.send(AttemptOutcome { generation, result })
            {
                if let Ok(acquired) = outcome.result {
                    acquired.release().await;
                }
            }
        });

        self.attempt = Some(Attempt {
            generation,
            role,
            cancel: Some(cancel_tx),
            reply: Some(reply),
        });
    }

    async fn apply_outcome(&mut self, outcome: AttemptOutcome) {
        let current = self
            .attempt
            .as_ref()
            .is_some_and(|a| a.generation == outcome.generation && a.generation == self.generation);

        if !current {
            debug!(
                "Discarding stale outcome of attempt {} (current {})",
                outcome.generation, self.generation
            );
            if let Ok(acquired) = outcome.result {
                acquired.release().await;
            }
            return;
        }

        let Some(mut attempt) = self.attempt.take() else {
            return;
        };
        let reply = attempt.reply.take();

        match outcome.result {
            Ok(acquired) => {
                let Acquired {
                    scheduler,
                    completions,
                    mic,
                    mut blocks,
                    link,
                } = acquired;

                // Audio captured before the link opened is stale
                while blocks.try_recv().is_ok() {}

                let (capture, frames) = Capture::attach(
                    mic,
                    blocks,
                    self.settings.frame_size,
                    self.settings.frame_queue,
                );
                let (sender, events) = link.into_parts();

                self.scheduler = Some(scheduler);
                self.completions = Some(completions);
                self.capture = Some(capture);
                self.frames = Some(frames);
                self.events = Some(events);
                self.channel.open(sender);
                self.started_at = Some(Utc::now());

                self.publish(ConnectionState::Connected, None);

                let intro = attempt.role.intro_message();
                if !self.send_text(&intro).await {
                    warn!("Initial role message could not be sent");
                }

                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(err) => {
                self.channel.close();
                self.fail(&err);
                if let Some(reply) = reply {
                    let _ = reply.send(Err(err));
                }
            }
        }
    }

    async fn disconnect(&mut self) {
        self.cancel_attempt();
        // Invalidate anything still in flight
        self.generation += 1;
        self.release_resources().await;

        let error = self.status_tx.borrow().error.clone();
        self.publish(ConnectionState::Disconnected, error);
    }

    /// Signal the running attempt, if any, and answer its caller
    ///
    /// The attempt releases whatever it already acquired on its own task; its
    /// outcome then arrives stale and is discarded.
    fn cancel_attempt(&mut self) {
        if let Some(mut attempt) = self.attempt.take() {
            if let Some(cancel) = attempt.cancel.take() {
                let _ = cancel.send(());
            }
            info!("Cancelled connection attempt {}", attempt.generation);
            if let Some(reply) = attempt.reply.take() {
                let _ = reply.send(Err(SessionError::Cancelled));
            }
        }
    }

    /// Tear down in order: capture, playback, output context, remote handle
    async fn release_resources(&mut self) {
        // Detach first so no frame is processed after this point
        self.frames = None;
        if let Some(mut capture) = self.capture.take() {
            capture.stop().await;
        }

        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.interrupt();
            self.last_cursor = scheduler.next_start_cursor();
            scheduler.teardown();
        }
        self.completions = None;

        self.events = None;
        self.channel.close();

        self.flush_transcripts().await;
        self.volume_tx.send_replace(0.0);
        self.started_at = None;
    }

    fn on_frame(&mut self, frame: CapturedFrame) {
        self.volume_tx.send_replace(frame.volume);
        self.channel.send_audio(frame.chunk);
    }

    async fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::AudioDelta(data) => self.schedule_audio(&data),

            ServerEvent::Interrupted => {
                if let Some(scheduler) = self.scheduler.as_mut() {
                    scheduler.interrupt();
                }
                self.flush_transcripts().await;
            }

            ServerEvent::TurnComplete => self.flush_transcripts().await,

            ServerEvent::InputTranscript(text) => self.pending_input.push_str(&text),

            ServerEvent::OutputTranscript(text) => self.pending_output.push_str(&text),

            ServerEvent::GoAway { time_left } => {
                let time_left = time_left.as_deref().unwrap_or("unknown");
                warn!(
                    "Realtime service will close the session soon (time left: {})",
                    time_left
                );
                let notice = format!(
                    "The interview service will end this session soon (time left: {})",
                    time_left
                );
                self.append(TranscriptRole::System, &notice).await;
            }

            ServerEvent::Closed { reason } => {
                info!("Realtime session closed: {}", reason);
                self.release_resources().await;
                // After the flush, so the notice closes the transcript
                let notice = format!("Session closed: {}", reason);
                self.append(TranscriptRole::System, &notice).await;
                self.publish(ConnectionState::Disconnected, None);
            }

            ServerEvent::TransportError(message) => {
                error!("Realtime transport error: {}", message);
                self.release_resources().await;
                self.fail(&SessionError::Transport(message));
            }
        }
    }

    fn schedule_audio(&mut self, data: &str) {
        let Some(scheduler) = self.scheduler.as_mut() else {
            debug!("Audio delta received without playback output, ignoring");
            return;
        };

        let chunk = codec::decode_base64(data).and_then(|bytes| {
            codec::decode_chunk(&bytes, self.settings.output_sample_rate, 1)
        });

        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Dropping malformed audio chunk: {}", e);
                self.chunks_rejected += 1;
                return;
            }
        };

        match scheduler.schedule(chunk) {
            Ok(_) => self.chunks_scheduled += 1,
            Err(e) => {
                warn!("Failed to schedule audio chunk: {}", e);
                self.chunks_rejected += 1;
            }
        }
    }

    async fn send_text(&mut self, text: &str) -> bool {
        let dispatched = self.channel.send_text(text);
        if dispatched {
            self.append(TranscriptRole::User, text).await;
        }
        dispatched
    }

    async fn append(&mut self, role: TranscriptRole, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.transcript
            .write()
            .await
            .push(TranscriptEntry::new(role, text));
    }

    async fn flush_transcripts(&mut self) {
        let input = std::mem::take(&mut self.pending_input);
        let output = std::mem::take(&mut self.pending_output);
        self.append(TranscriptRole::User, &input).await;
        self.append(TranscriptRole::Model, &output).await;
    }

    fn fail(&mut self, err: &SessionError) {
        let message = err.user_message();
        error!("Session error: {}", err);
        self.publish(ConnectionState::Error, Some(message));
    }

    fn publish(&mut self, state: ConnectionState, error: Option<String>) {
        let previous = self.status_tx.borrow().connection_state;
        if previous != state {
            info!("Session state: {} -> {}", previous, state);
        }
        self.status_tx.send_replace(SessionStatus {
            connection_state: state,
            error,
        });
    }

    async fn stats(&mut self) -> SessionStats {
        let transcript_entries = self.transcript.read().await.len();
        let connection_state = self.status_tx.borrow().connection_state;
        let duration_secs = self
            .started_at
            .map(|t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStats {
            connection_state,
            started_at: self.started_at,
            duration_secs,
            frames_sent: self.channel.frames_sent(),
            frames_dropped: self.channel.frames_dropped(),
            texts_dropped: self.channel.texts_dropped(),
            chunks_scheduled: self.chunks_scheduled,
            chunks_rejected: self.chunks_rejected,
            active_sources: self
                .scheduler
                .as_ref()
                .map(|s| s.active_sources())
                .unwrap_or(0),
            playback_cursor_secs: self
                .scheduler
                .as_ref()
                .map(|s| s.next_start_cursor())
                .unwrap_or(self.last_cursor),
            transcript_entries,
        }
    }
}

/// Handle to the session worker
///
/// Dropping the controller shuts the worker down and releases every device.
pub struct SessionController {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
    volume: watch::Receiver<f32>,
    transcript: Arc<RwLock<Vec<TranscriptEntry>>>,
}

impl SessionController {
    /// Spawn the worker. Must be called inside a tokio runtime.
    pub fn new(
        settings: SessionSettings,
        transport: Arc<dyn RealtimeTransport>,
        devices: Arc<dyn AudioDevices>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let (volume_tx, volume_rx) = watch::channel(0.0f32);
        let transcript = Arc::new(RwLock::new(Vec::new()));

        info!(
            "Session controller ready (model {}, transport {})",
            settings.model,
            transport.name()
        );

        let worker = Worker::new(
            settings,
            transport,
            devices,
            status_tx,
            volume_tx,
            Arc::clone(&transcript),
            outcome_tx,
        );

        tokio::spawn(worker.run(command_rx, outcome_rx));

        Self {
            commands: command_tx,
            status: status_rx,
            volume: volume_rx,
            transcript,
        }
    }

    /// Start a session for `role`, tearing down any previous one first
    ///
    /// Resolves once the attempt succeeded, failed, or was superseded. The
    /// outcome is also reflected in [`SessionController::status`].
    pub async fn connect(&self, role: RoleConfig) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Connect { role, reply }).await.is_err() {
            return Err(SessionError::Cancelled);
        }
        rx.await.unwrap_or(Err(SessionError::Cancelled))
    }

    /// Tear everything down and go to DISCONNECTED. Safe to call at any time.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Send a user message. Returns false when no session is open.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = Command::SendText {
            text: text.into(),
            reply,
        };
        if self.commands.send(command).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.status.borrow().connection_state
    }

    /// RMS of the last captured frame
    pub fn volume(&self) -> f32 {
        *self.volume.borrow()
    }

    pub fn error(&self) -> Option<String> {
        self.status.borrow().error.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn subscribe_volume(&self) -> watch::Receiver<f32> {
        self.volume.clone()
    }

    pub async fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.read().await.clone()
    }

    pub async fn stats(&self) -> SessionStats {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stats { reply }).await.is_err() {
            return SessionStats::default();
        }
        rx.await.unwrap_or_default()
    }
}
