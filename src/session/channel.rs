//! Outbound side of the session: the deferred remote handle
//!
//! Sends are applied only when the handle is `Open`. While a connect is
//! pending, failed, or closed they are dropped on the spot: stale audio is
//! worthless, so nothing is queued for later delivery.

use tracing::{debug, info, warn};

use crate::audio::codec::EncodedAudioChunk;
use crate::realtime::{LinkSender, Outbound};

/// Resolution state of the remote handle
#[derive(Debug, Default)]
pub enum SessionHandle {
    /// No attempt in flight
    #[default]
    Idle,
    /// A connect attempt is running
    Pending,
    /// The remote session acknowledged setup
    Open(LinkSender),
}

#[derive(Debug, Default)]
pub struct SessionChannel {
    handle: SessionHandle,
    frames_sent: u64,
    frames_dropped: u64,
    texts_dropped: u64,
}

impl SessionChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a new attempt as in flight, closing any previous handle first
    pub fn begin(&mut self) {
        self.close();
        self.handle = SessionHandle::Pending;
    }

    /// Resolve the handle
    pub fn open(&mut self, sender: LinkSender) {
        self.close();
        self.handle = SessionHandle::Open(sender);
        info!("Session channel open");
    }

    pub fn is_open(&self) -> bool {
        matches!(self.handle, SessionHandle::Open(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.handle, SessionHandle::Pending)
    }

    /// Forward one encoded frame. Returns whether it was dispatched.
    pub fn send_audio(&mut self, chunk: EncodedAudioChunk) -> bool {
        let SessionHandle::Open(sender) = &self.handle else {
            self.frames_dropped += 1;
            debug!("Dropping audio frame, session handle not open");
            return false;
        };

        match sender.try_send(Outbound::Audio(chunk)) {
            Ok(()) => {
                self.frames_sent += 1;
                true
            }
            Err(e) => {
                self.frames_dropped += 1;
                debug!("Dropping audio frame: {}", e);
                false
            }
        }
    }

    /// Forward a text message. Returns whether it was dispatched.
    pub fn send_text(&mut self, text: &str) -> bool {
        let SessionHandle::Open(sender) = &self.handle else {
            self.texts_dropped += 1;
            warn!("Dropping text message, session handle not open");
            return false;
        };

        match sender.try_send(Outbound::Text(text.to_string())) {
            Ok(()) => true,
            Err(e) => {
                self.texts_dropped += 1;
                warn!("Dropping text message: {}", e);
                false
            }
        }
    }

    /// Close the remote handle, if any. Closing twice is a no-op.
    pub fn close(&mut self) {
        if let SessionHandle::Open(sender) = std::mem::take(&mut self.handle) {
            sender.close();
            info!("Session channel closed");
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub fn texts_dropped(&self) -> u64 {
        self.texts_dropped
    }

    pub fn reset_counters(&mut self) {
        self.frames_sent = 0;
        self.frames_dropped = 0;
        self.texts_dropped = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::encode_frame;
    use crate::realtime::RealtimeLink;
    use tokio::sync::mpsc;

    fn open_link() -> (LinkSender, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        let (_event_tx, event_rx) = mpsc::channel(1);
        let (sender, _events) = RealtimeLink::new(tx, event_rx).into_parts();
        (sender, rx)
    }

    #[test]
    fn test_send_while_pending_is_dropped_not_queued() {
        let mut channel = SessionChannel::new();
        channel.begin();
        assert!(channel.is_pending());

        assert!(!channel.send_audio(encode_frame(&[0.1; 16])));
        assert!(!channel.send_text("hello"));
        assert_eq!(channel.frames_dropped(), 1);
        assert_eq!(channel.texts_dropped(), 1);

        // Resolving later must not flush anything
        let (sender, mut rx) = open_link();
        channel.open(sender);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_when_open() {
        let mut channel = SessionChannel::new();
        let (sender, mut rx) = open_link();
        channel.open(sender);

        let chunk = encode_frame(&[0.1; 16]);
        assert!(channel.send_audio(chunk.clone()));
        assert!(channel.send_text("hi"));

        assert_eq!(rx.try_recv().unwrap(), Outbound::Audio(chunk));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Text("hi".to_string()));
        assert_eq!(channel.frames_sent(), 1);
    }

    #[test]
    fn test_text_dropped_when_outbound_queue_full() {
        let mut channel = SessionChannel::new();
        let (tx, mut rx) = mpsc::channel(1);
        let (_event_tx, event_rx) = mpsc::channel(1);
        let (sender, _events) = RealtimeLink::new(tx, event_rx).into_parts();
        channel.open(sender);

        assert!(channel.send_text("first"));
        assert!(!channel.send_text("second"));
        assert_eq!(channel.texts_dropped(), 1);

        // Only the dispatched message is queued
        assert_eq!(rx.try_recv().unwrap(), Outbound::Text("first".to_string()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_is_idempotent_and_sends_close_once() {
        let mut channel = SessionChannel::new();
        let (sender, mut rx) = open_link();
        channel.open(sender);

        channel.close();
        channel.close();
        assert!(!channel.is_open());
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        // Sender dropped with the handle
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        assert!(!channel.send_audio(encode_frame(&[0.0; 4])));
    }
}
