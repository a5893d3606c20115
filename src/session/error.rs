use thiserror::Error;

use super::config::API_KEY_ENV;
use crate::audio::backend::AudioDeviceError;
use crate::realtime::RealtimeError;

/// Anything that sends the session into the ERROR state
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Missing or invalid local configuration; raised before any I/O
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Microphone access was refused
    #[error("microphone permission denied: {0}")]
    Permission(String),

    /// The remote session rejected the setup or dropped
    #[error("transport error: {0}")]
    Transport(String),

    /// An audio device could not be opened or failed
    #[error("audio device error: {0}")]
    Device(String),

    /// The attempt was superseded by `disconnect` or a newer `connect`
    #[error("connection attempt cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn missing_credential() -> Self {
        SessionError::Configuration(format!(
            "{} is not set. Export it (or add it to .env) and try again.",
            API_KEY_ENV
        ))
    }

    /// Message shown to the user next to the retry affordance. Never empty.
    pub fn user_message(&self) -> String {
        let detail = match self {
            SessionError::Configuration(m)
            | SessionError::Permission(m)
            | SessionError::Transport(m)
            | SessionError::Device(m) => m.trim(),
            SessionError::Cancelled => "",
        };

        match self {
            SessionError::Configuration(_) if !detail.is_empty() => detail.to_string(),
            SessionError::Permission(_) => format!(
                "Microphone access was denied{}. Allow microphone access and reconnect.",
                suffix(detail)
            ),
            SessionError::Transport(_) => format!(
                "Connection to the interview service failed{}. Reconnect to try again.",
                suffix(detail)
            ),
            SessionError::Device(_) => format!(
                "Audio device unavailable{}. Check your audio setup and reconnect.",
                suffix(detail)
            ),
            SessionError::Configuration(_) => {
                "The session is not configured correctly.".to_string()
            }
            SessionError::Cancelled => "The connection attempt was cancelled.".to_string(),
        }
    }
}

fn suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(" ({})", detail)
    }
}

impl From<AudioDeviceError> for SessionError {
    fn from(err: AudioDeviceError) -> Self {
        match err {
            AudioDeviceError::PermissionDenied(m) => SessionError::Permission(m),
            AudioDeviceError::Unavailable(m) | AudioDeviceError::Failed(m) => {
                SessionError::Device(m)
            }
        }
    }
}

impl From<RealtimeError> for SessionError {
    fn from(err: RealtimeError) -> Self {
        SessionError::Transport(err.to_string())
    }
}
