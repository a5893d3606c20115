// Test doubles shared by the session and HTTP integration tests
//
// FakeDevices hands out a FakeOutput with a manually driven clock and a
// FakeMic whose frames are pushed by the test. FakeTransport accepts,
// rejects, or holds connect attempts and exposes the server side of every
// link it opens.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use voice_coach::audio::{
    AudioDeviceError, AudioDevices, AudioFrame, CaptureBackend, CaptureConfig, PlaybackChunk,
    PlaybackOutput, SourceId,
};
use voice_coach::realtime::{
    LiveSessionConfig, Outbound, RealtimeError, RealtimeLink, RealtimeTransport, ServerEvent,
};
use voice_coach::session::{ApiKey, Credentials, SessionSettings};

pub const TEST_KEY: &str = "test-key";

pub fn test_settings() -> SessionSettings {
    SessionSettings::default().with_credentials(Credentials::with_api_key(TEST_KEY))
}

/// Poll `check` until it holds, failing the test after five seconds
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert!(result.is_ok(), "condition not met within 5s");
}

/// Base64 PCM16 of `secs` seconds of a quiet tone at 24 kHz
pub fn audio_delta(secs: f64) -> String {
    let samples: Vec<f32> = (0..(secs * 24000.0) as usize)
        .map(|i| (i as f32 * 0.05).sin() * 0.2)
        .collect();
    voice_coach::audio::codec::encode_frame_at(&samples, 24000).data
}

// =============================================================================
// Playback output
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StartedSource {
    pub id: SourceId,
    pub start: f64,
    pub duration: f64,
}

#[derive(Default)]
pub struct OutputState {
    pub now: f64,
    pub started: Vec<StartedSource>,
    pub stopped: Vec<SourceId>,
    pub closed: usize,
    pub completions: Option<mpsc::UnboundedSender<SourceId>>,
}

pub struct FakeOutput {
    state: Arc<Mutex<OutputState>>,
}

impl FakeOutput {
    pub fn new(state: Arc<Mutex<OutputState>>) -> Self {
        Self { state }
    }
}

impl PlaybackOutput for FakeOutput {
    fn current_time(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn start_source(
        &mut self,
        id: SourceId,
        chunk: PlaybackChunk,
        start_at: f64,
    ) -> Result<(), AudioDeviceError> {
        let mut state = self.state.lock().unwrap();
        if state.closed > 0 {
            return Err(AudioDeviceError::Unavailable("closed".into()));
        }
        state.started.push(StartedSource {
            id,
            start: start_at,
            duration: chunk.duration(),
        });
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        self.state.lock().unwrap().stopped.push(id);
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed += 1;
    }

    fn name(&self) -> &str {
        "fake output"
    }
}

/// Test-side view of the output
#[derive(Clone, Default)]
pub struct OutputRecorder {
    pub state: Arc<Mutex<OutputState>>,
}

impl OutputRecorder {
    pub fn set_time(&self, now: f64) {
        self.state.lock().unwrap().now = now;
    }

    pub fn started(&self) -> Vec<StartedSource> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    /// Report natural completion of every started, unstopped source
    pub fn complete_all(&self) {
        let state = self.state.lock().unwrap();
        if let Some(tx) = &state.completions {
            for source in &state.started {
                if !state.stopped.contains(&source.id) {
                    let _ = tx.send(source.id);
                }
            }
        }
    }
}

// =============================================================================
// Devices
// =============================================================================

#[derive(Default)]
pub struct DeviceCounters {
    pub outputs_opened: AtomicUsize,
    pub mic_starts: AtomicUsize,
    pub mic_stops: AtomicUsize,
}

pub struct FakeDevices {
    pub output: OutputRecorder,
    pub counters: Arc<DeviceCounters>,
    pub deny_microphone: bool,
    mic_tx: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self {
            output: OutputRecorder::default(),
            counters: Arc::new(DeviceCounters::default()),
            deny_microphone: false,
            mic_tx: Arc::new(Mutex::new(None)),
        }
    }

    pub fn denying_microphone() -> Self {
        Self {
            deny_microphone: true,
            ..Self::new()
        }
    }

    pub fn outputs_opened(&self) -> usize {
        self.counters.outputs_opened.load(Ordering::SeqCst)
    }

    pub fn mic_starts(&self) -> usize {
        self.counters.mic_starts.load(Ordering::SeqCst)
    }

    pub fn mic_stops(&self) -> usize {
        self.counters.mic_stops.load(Ordering::SeqCst)
    }

    /// Deliver a block as if the microphone captured it
    pub fn push_block(&self, samples: Vec<f32>) -> bool {
        let guard = self.mic_tx.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => tx
                .try_send(AudioFrame {
                    samples,
                    sample_rate: 16000,
                    timestamp_ms: 0,
                })
                .is_ok(),
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl AudioDevices for FakeDevices {
    async fn open_output(
        &self,
        _sample_rate: u32,
        completions: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn PlaybackOutput>, AudioDeviceError> {
        self.counters.outputs_opened.fetch_add(1, Ordering::SeqCst);

        // Each session gets a fresh output state
        let mut state = self.output.state.lock().unwrap();
        *state = OutputState {
            completions: Some(completions),
            ..OutputState::default()
        };
        drop(state);

        Ok(Box::new(FakeOutput::new(Arc::clone(&self.output.state))))
    }

    fn capture_backend(
        &self,
        _config: CaptureConfig,
    ) -> Result<Box<dyn CaptureBackend>, AudioDeviceError> {
        Ok(Box::new(FakeMic {
            deny: self.deny_microphone,
            counters: Arc::clone(&self.counters),
            tx: Arc::clone(&self.mic_tx),
            capturing: false,
        }))
    }
}

pub struct FakeMic {
    deny: bool,
    counters: Arc<DeviceCounters>,
    tx: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    capturing: bool,
}

#[async_trait::async_trait]
impl CaptureBackend for FakeMic {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AudioDeviceError> {
        if self.deny {
            return Err(AudioDeviceError::PermissionDenied(
                "user dismissed the prompt".into(),
            ));
        }
        self.counters.mic_starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);
        *self.tx.lock().unwrap() = Some(tx);
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), AudioDeviceError> {
        if self.capturing {
            self.counters.mic_stops.fetch_add(1, Ordering::SeqCst);
            self.tx.lock().unwrap().take();
            self.capturing = false;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Server side of a link opened by FakeTransport
pub struct FakeServer {
    pub outbound: mpsc::Receiver<Outbound>,
    pub events: mpsc::Sender<ServerEvent>,
}

impl FakeServer {
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        tokio::time::timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .ok()
            .flatten()
    }

    pub async fn emit(&self, event: ServerEvent) {
        self.events.send(event).await.unwrap();
    }
}

pub enum Behavior {
    Accept,
    Reject(RealtimeError),
    /// Wait for the gate before accepting
    Hold(Arc<Notify>),
}

pub struct FakeTransport {
    behavior: Mutex<Behavior>,
    connects: AtomicUsize,
    servers: Mutex<Vec<FakeServer>>,
    seen: Mutex<Vec<(String, LiveSessionConfig)>>,
}

impl FakeTransport {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            connects: AtomicUsize::new(0),
            servers: Mutex::new(Vec::new()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn accepting() -> Self {
        Self::new(Behavior::Accept)
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Oldest link not yet taken by the test
    pub fn take_server(&self) -> Option<FakeServer> {
        let mut servers = self.servers.lock().unwrap();
        if servers.is_empty() {
            None
        } else {
            Some(servers.remove(0))
        }
    }

    pub fn seen(&self) -> Vec<(String, LiveSessionConfig)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RealtimeTransport for FakeTransport {
    async fn connect(
        &self,
        api_key: &ApiKey,
        config: &LiveSessionConfig,
    ) -> Result<RealtimeLink, RealtimeError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((api_key.expose().to_string(), config.clone()));

        let gate = match &*self.behavior.lock().unwrap() {
            Behavior::Accept => None,
            Behavior::Reject(err) => return Err(err.clone()),
            Behavior::Hold(gate) => Some(Arc::clone(gate)),
        };

        if let Some(gate) = gate {
            gate.notified().await;
        }

        let (out_tx, out_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        self.servers.lock().unwrap().push(FakeServer {
            outbound: out_rx,
            events: event_tx,
        });

        Ok(RealtimeLink::new(out_tx, event_rx))
    }

    fn name(&self) -> &str {
        "fake transport"
    }
}
