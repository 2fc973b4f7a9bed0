use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The audio clock: how many frames the output stream has rendered.
///
/// The output callback advances it once per block; everything on the control
/// side reads it to turn "seconds on the audio clock" into absolute frame
/// indices the renderer can act on sample-accurately.
#[derive(Clone, Debug)]
pub struct AudioClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl AudioClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn now_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }

    /// Frame index of a clock time, rounded to the nearest frame.
    pub fn secs_to_frame(&self, secs: f64) -> u64 {
        (secs.max(0.0) * self.sample_rate as f64).round() as u64
    }

    pub fn frame_to_secs(&self, frame: u64) -> f64 {
        frame as f64 / self.sample_rate as f64
    }
}
