//! Live interview session management
//!
//! This module provides the `SessionController` abstraction that manages:
//! - The connection state machine (DISCONNECTED, CONNECTING, CONNECTED, ERROR)
//! - Microphone capture bound to the remote session
//! - Gapless playback of synthesized speech with barge-in interruption
//! - The UI-facing transcript, volume and error signals

pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod state;

pub use channel::{SessionChannel, SessionHandle};
pub use config::{ApiKey, Credentials, RoleConfig, SessionSettings};
pub use controller::SessionController;
pub use error::SessionError;
pub use state::{
    ConnectionState, SessionStats, SessionStatus, TranscriptEntry, TranscriptRole,
};
