use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::{CaptureSource, DefaultAudioDevices, OutputTarget};
use crate::realtime::{GeminiLiveTransport, DEFAULT_ENDPOINT};
use crate::session::config::{DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE};
use crate::session::{Credentials, SessionSettings};

/// Looked up when no `--config` is given; may be absent
pub const DEFAULT_CONFIG_PATH: &str = "config/voice-coach";

/// Prefix of environment overrides, e.g. `VOICE_COACH__AUDIO__OUTPUT=null`
pub const ENV_PREFIX: &str = "VOICE_COACH";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
    pub capture_buffer_ms: u64,
    /// WAV file standing in for the microphone; absent means the microphone
    #[serde(default)]
    pub input: Option<String>,
    /// `device`, `null`, or a WAV path to render into
    pub output: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub voice: String,
    pub endpoint: String,
    pub system_instruction: String,
    pub transcribe: bool,
    pub setup_timeout_secs: u64,
}

impl Config {
    /// Defaults, then the config file, then `VOICE_COACH__*` environment overrides
    ///
    /// With `None` the default file is optional; an explicit path must exist.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let (file, required) = match path {
            Some(p) => (p, true),
            None => (DEFAULT_CONFIG_PATH, false),
        };

        let settings = config::Config::builder()
            .set_default("service.name", "voice-coach")?
            .set_default("service.http.bind", "127.0.0.1")?
            .set_default("service.http.port", 8089)?
            .set_default("audio.input_sample_rate", 16000)?
            .set_default("audio.output_sample_rate", 24000)?
            .set_default("audio.frame_size", 4096)?
            .set_default("audio.capture_buffer_ms", 100)?
            .set_default("audio.output", "device")?
            .set_default("model.name", DEFAULT_MODEL)?
            .set_default("model.voice", DEFAULT_VOICE)?
            .set_default("model.endpoint", DEFAULT_ENDPOINT)?
            .set_default("model.system_instruction", DEFAULT_SYSTEM_INSTRUCTION)?
            .set_default("model.transcribe", false)?
            .set_default("model.setup_timeout_secs", 15)?
            .add_source(config::File::with_name(file).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {}", file))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn session_settings(&self, credentials: Credentials) -> SessionSettings {
        SessionSettings {
            credentials,
            model: self.model.name.clone(),
            voice: self.model.voice.clone(),
            system_instruction: self.model.system_instruction.clone(),
            transcribe: self.model.transcribe,
            input_sample_rate: self.audio.input_sample_rate,
            output_sample_rate: self.audio.output_sample_rate,
            frame_size: self.audio.frame_size,
            capture_buffer_ms: self.audio.capture_buffer_ms,
            ..SessionSettings::default()
        }
    }

    pub fn audio_devices(&self) -> DefaultAudioDevices {
        DefaultAudioDevices::new(
            CaptureSource::from_path(self.audio.input.as_deref()),
            OutputTarget::parse(&self.audio.output),
        )
    }

    pub fn transport(&self) -> GeminiLiveTransport {
        GeminiLiveTransport::new(
            self.model.endpoint.clone(),
            Duration::from_secs(self.model.setup_timeout_secs.max(1)),
        )
    }
}
