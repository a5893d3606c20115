use serde::{Deserialize, Serialize};
use std::fmt;

use crate::audio::capture::DEFAULT_FRAME_SIZE;
use crate::audio::codec::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::realtime::LiveSessionConfig;

/// Environment variable holding the model service key
pub const API_KEY_ENV: &str = "API_KEY";

/// Accepted when `API_KEY` is unset
pub const API_KEY_FALLBACK_ENV: &str = "GEMINI_API_KEY";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";
pub const DEFAULT_VOICE: &str = "Zephyr";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a seasoned hiring manager running a \
realistic mock interview. Ask one question at a time and wait for the answer. After each \
answer give short, concrete feedback on clarity, structure and content, then move on. Speak \
slowly and clearly; many candidates are practicing in a second language.";

/// Secret used to authenticate with the model service
///
/// `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// `None` for an empty or whitespace-only value
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    api_key: Option<ApiKey>,
}

impl Credentials {
    /// Read `API_KEY` (or `GEMINI_API_KEY`) from the process environment
    pub fn from_env() -> Self {
        let api_key = [API_KEY_ENV, API_KEY_FALLBACK_ENV]
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find_map(|value| ApiKey::new(value));

        Self { api_key }
    }

    pub fn with_api_key(value: impl Into<String>) -> Self {
        Self {
            api_key: ApiKey::new(value),
        }
    }

    pub fn missing() -> Self {
        Self { api_key: None }
    }

    pub fn api_key(&self) -> Option<&ApiKey> {
        self.api_key.as_ref()
    }
}

/// The position the candidate is practicing for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub role: String,
    pub level: String,
    #[serde(default)]
    pub description: String,
}

impl RoleConfig {
    pub fn new(
        role: impl Into<String>,
        level: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            level: level.into(),
            description: description.into(),
        }
    }

    /// First user message, sent as soon as the session is open
    pub fn intro_message(&self) -> String {
        format!(
            "I am ready for my interview. I am applying for the position of {} ({}). \
             Context: {}. Start the interview now.",
            self.role, self.level, self.description
        )
    }
}

/// Everything a session needs besides the devices and the transport
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub credentials: Credentials,

    /// Model name, with or without the `models/` prefix
    pub model: String,

    /// Prebuilt voice used for synthesized speech
    pub voice: String,

    pub system_instruction: String,

    /// Ask the service for input/output transcriptions
    pub transcribe: bool,

    /// Microphone rate sent to the service (16 kHz)
    pub input_sample_rate: u32,

    /// Rate of synthesized speech (24 kHz)
    pub output_sample_rate: u32,

    /// Samples per captured frame
    pub frame_size: usize,

    /// Block size requested from capture backends
    pub capture_buffer_ms: u64,

    /// Queue depth between the capture pump and the session worker
    pub frame_queue: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            credentials: Credentials::missing(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            transcribe: false,
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            capture_buffer_ms: 100,
            frame_queue: 16,
        }
    }
}

impl SessionSettings {
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn live_config(&self) -> LiveSessionConfig {
        LiveSessionConfig {
            model: self.model.clone(),
            voice: self.voice.clone(),
            system_instruction: Some(self.system_instruction.clone()),
            transcribe: self.transcribe,
        }
    }
}
