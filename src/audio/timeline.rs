// Sample-accurate playback timeline
//
// Sources are placed at absolute start positions on a single clock and mixed
// together by simple addition with clipping. Whoever drives `render` (a
// device callback or a tokio ticker) advances the clock; sources whose last
// sample has been rendered are reported as finished.

use tracing::debug;

use super::playback::SourceId;

struct TimelineSource {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl TimelineSource {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Mono mixing timeline running at a fixed sample rate
pub struct Timeline {
    sample_rate: u32,
    position: u64,
    sources: Vec<TimelineSource>,
}

impl Timeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            position: 0,
            sources: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current clock time in seconds (frames rendered so far)
    pub fn now(&self) -> f64 {
        self.position as f64 / self.sample_rate as f64
    }

    /// Number of sources waiting or playing
    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    /// Place a source on the timeline
    ///
    /// Start times in the past are pulled forward to the current position so
    /// a late source plays immediately instead of being truncated.
    pub fn add(&mut self, id: SourceId, samples: Vec<f32>, start_secs: f64) {
        let requested = (start_secs.max(0.0) * self.sample_rate as f64).round() as u64;
        let start_frame = requested.max(self.position);

        debug!(
            "Timeline source {} at frame {} ({} samples)",
            id,
            start_frame,
            samples.len()
        );

        self.sources.push(TimelineSource {
            id,
            start_frame,
            samples,
        });
    }

    /// Remove a source before it finishes. Returns false if it was not present.
    pub fn remove(&mut self, id: SourceId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.id != id);
        self.sources.len() != before
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }

    /// Mix the next `out.len()` frames and advance the clock
    ///
    /// Returns the ids of sources that finished within this block.
    pub fn render(&mut self, out: &mut [f32]) -> Vec<SourceId> {
        out.iter_mut().for_each(|s| *s = 0.0);

        let block_start = self.position;
        let block_end = block_start + out.len() as u64;

        for source in &self.sources {
            if source.start_frame >= block_end || source.end_frame() <= block_start {
                continue;
            }

            let from = source.start_frame.max(block_start);
            let to = source.end_frame().min(block_end);

            for frame in from..to {
                let out_idx = (frame - block_start) as usize;
                let src_idx = (frame - source.start_frame) as usize;
                out[out_idx] += source.samples[src_idx];
            }
        }

        // Clip to prevent overflow when sources overlap
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.position = block_end;

        let mut finished = Vec::new();
        self.sources.retain(|s| {
            if s.end_frame() <= block_end {
                finished.push(s.id);
                false
            } else {
                true
            }
        });

        finished
    }
}
