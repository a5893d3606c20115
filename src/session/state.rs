use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Connection state of the live session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// State plus the last error message, published as one value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionStatus {
    pub connection_state: ConnectionState,

    /// Human-readable message of the last failure, if any
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Model,
    System,
}

/// One line of the session transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: Uuid,

    pub role: TranscriptRole,

    pub text: String,

    /// When this entry was appended
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(role: TranscriptRole, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Statistics about the current (or last) session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub connection_state: ConnectionState,

    /// When the current session reached CONNECTED
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since `started_at`
    pub duration_secs: f64,

    /// Encoded frames handed to the link
    pub frames_sent: u64,

    /// Audio frames dropped because no link was open
    pub frames_dropped: u64,

    /// Text messages dropped because no link was open
    pub texts_dropped: u64,

    /// Chunks placed on the playback clock
    pub chunks_scheduled: u64,

    /// Malformed audio deltas that were skipped
    pub chunks_rejected: u64,

    /// Sources scheduled but not yet finished
    pub active_sources: usize,

    /// End of the last scheduled chunk on the playback clock
    pub playback_cursor_secs: f64,

    pub transcript_entries: usize,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            connection_state: ConnectionState::Disconnected,
            started_at: None,
            duration_secs: 0.0,
            frames_sent: 0,
            frames_dropped: 0,
            texts_dropped: 0,
            chunks_scheduled: 0,
            chunks_rejected: 0,
            active_sources: 0,
            playback_cursor_secs: 0.0,
            transcript_entries: 0,
        }
    }
}
