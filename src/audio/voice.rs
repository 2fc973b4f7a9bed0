use std::sync::Arc;

use super::frame::StereoFrame;
use super::track::DecodedTrack;

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

// One track playing from a fixed offset. Waits silently until the output clock
// reaches `start_frame`, then reads the track at `step` source frames per
// output frame (covers file rates that differ from the device rate).
#[derive(Clone, Debug)]
pub struct Voice {
    pub active: bool,
    track: Arc<DecodedTrack>,
    start_frame: u64,
    pos: f64,
    step: f64,
}

impl Voice {
    pub fn new(
        track: Arc<DecodedTrack>,
        offset_secs: f64,
        start_frame: u64,
        output_rate: u32,
    ) -> Self {
        let len = track.len_frames() as f64;
        let pos = (offset_secs.max(0.0) * track.sample_rate() as f64).min(len);
        let step = track.sample_rate() as f64 / output_rate.max(1) as f64;
        Self {
            active: pos < len,
            track,
            start_frame,
            pos,
            step,
        }
    }

    // `block_start` is the absolute output frame of out[0]
    pub fn render_into(&mut self, out: &mut [StereoFrame], block_start: u64) {
        if !self.active {
            return;
        }
        let len = self.track.len_frames();
        let skip = self.start_frame.saturating_sub(block_start);
        if skip >= out.len() as u64 {
            return; // not our turn yet
        }

        for frame in out[skip as usize..].iter_mut() {
            let i = self.pos as usize;
            if i >= len {
                self.active = false;
                break;
            }
            let frac = (self.pos - i as f64) as f32;
            let s0 = self.track.frame(i);
            let s1 = if i + 1 < len { self.track.frame(i + 1) } else { s0 };
            *frame += StereoFrame {
                left: lerp(s0.left, s1.left, frac),
                right: lerp(s0.right, s1.right, frac),
            };
            self.pos += self.step;
        }
    }
}
