//! Realtime model service link
//!
//! - `messages`: wire types of the Gemini Live protocol and the events the
//!   session reacts to
//! - `client`: the WebSocket transport and the `RealtimeTransport` seam

pub mod client;
pub mod messages;

pub use client::{
    GeminiLiveTransport, LinkSender, LiveSessionConfig, RealtimeError, RealtimeLink,
    RealtimeTransport, DEFAULT_ENDPOINT,
};
pub use messages::{ClientMessage, Outbound, ServerEvent, ServerMessage};
