//! Gapless playback scheduling with hard interruption
//!
//! Decoded chunks are laid back-to-back on the output clock. The next start
//! time is always `max(cursor, now)`, so chunks that arrive ahead of playback
//! queue up without gaps, and chunks that arrive late start immediately.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use super::backend::AudioDeviceError;
use super::codec::PlaybackChunk;

/// Identifier of one scheduled playback source
pub type SourceId = u64;

/// An audio output context: a clock plus the ability to start and stop sources
///
/// Implementations report natural completion of a source by sending its id
/// on the completion channel they were opened with. A stopped source must
/// not be reported afterwards; if it is, the scheduler ignores it.
pub trait PlaybackOutput: Send {
    /// Current playback clock time in seconds
    fn current_time(&self) -> f64;

    /// Start `chunk` at clock time `start_at`
    fn start_source(
        &mut self,
        id: SourceId,
        chunk: PlaybackChunk,
        start_at: f64,
    ) -> Result<(), AudioDeviceError>;

    /// Stop a source immediately
    fn stop_source(&mut self, id: SourceId);

    /// Release the output. Closing twice is a no-op.
    fn close(&mut self);

    fn name(&self) -> &str;
}

/// Where a chunk landed on the output clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start: f64,
    pub duration: f64,
}

pub struct PlaybackScheduler {
    output: Box<dyn PlaybackOutput>,
    scheduled: BTreeSet<SourceId>,
    next_start: f64,
    next_id: SourceId,
    closed: bool,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn PlaybackOutput>) -> Self {
        info!("Playback scheduler attached to {}", output.name());

        Self {
            output,
            scheduled: BTreeSet::new(),
            next_start: 0.0,
            next_id: 1,
            closed: false,
        }
    }

    /// Schedule a chunk right after the previously scheduled one
    pub fn schedule(&mut self, chunk: PlaybackChunk) -> Result<ScheduledSource, AudioDeviceError> {
        if self.closed {
            return Err(AudioDeviceError::Unavailable(
                "playback output already closed".to_string(),
            ));
        }

        let start = self.next_start.max(self.output.current_time());
        let duration = chunk.duration();
        let id = self.next_id;
        self.next_id += 1;

        self.output.start_source(id, chunk, start)?;
        self.scheduled.insert(id);
        self.next_start = start + duration;

        debug!(
            "Scheduled source {} at {:.3}s for {:.3}s ({} pending)",
            id,
            start,
            duration,
            self.scheduled.len()
        );

        Ok(ScheduledSource {
            id,
            start,
            duration,
        })
    }

    /// Completion handler: forget a source that finished playing
    ///
    /// Returns false for ids that are no longer tracked (already stopped).
    pub fn source_ended(&mut self, id: SourceId) -> bool {
        self.scheduled.remove(&id)
    }

    /// Stop everything that is scheduled and restart the cursor at zero
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.scheduled.len();

        for id in std::mem::take(&mut self.scheduled) {
            self.output.stop_source(id);
        }
        self.next_start = 0.0;

        if stopped > 0 {
            info!("Playback interrupted, stopped {} sources", stopped);
        }

        stopped
    }

    /// Interrupt and release the output
    pub fn teardown(&mut self) {
        self.interrupt();
        if !self.closed {
            self.output.close();
            self.closed = true;
            info!("Playback output {} closed", self.output.name());
        }
    }

    /// End time of the last scheduled chunk (0 after an interrupt)
    pub fn next_start_cursor(&self) -> f64 {
        self.next_start
    }

    /// Number of sources scheduled but not finished
    pub fn active_sources(&self) -> usize {
        self.scheduled.len()
    }

    pub fn is_scheduled(&self, id: SourceId) -> bool {
        self.scheduled.contains(&id)
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Playback scheduler dropped without teardown, closing output");
            self.teardown();
        }
    }
}
