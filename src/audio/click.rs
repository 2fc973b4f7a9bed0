use super::frame::StereoFrame;
use crate::config::MetronomeConfig;

// envelope floor; exponential ramps can't start or end at zero
const ENV_FLOOR: f32 = 0.0001;

/// One metronome click, rendered ahead of time so the audio thread only copies.
#[derive(Clone, Debug)]
pub struct ClickShape {
    samples: Vec<f32>,
}

impl ClickShape {
    pub fn new(config: &MetronomeConfig, sample_rate: u32) -> Self {
        let sr = sample_rate.max(1) as f32;
        let len = (config.duration_secs.max(0.0) * sr).round() as usize;
        let attack = config.attack_secs.max(1e-6);
        let decay = config.decay_secs.max(attack + 1e-6);

        let samples = (0..len)
            .map(|i| {
                let t = i as f32 / sr;
                let cycle = (config.frequency_hz * t).fract();
                let square = if cycle < 0.5 { 1.0 } else { -1.0 };
                square * envelope(t, attack, decay)
            })
            .collect();
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

// floor -> 1.0 over the attack, back down to the floor at `decay`, then held
fn envelope(t: f32, attack: f32, decay: f32) -> f32 {
    if t < attack {
        ENV_FLOOR * (1.0 / ENV_FLOOR).powf(t / attack)
    } else if t < decay {
        ENV_FLOOR.powf((t - attack) / (decay - attack))
    } else {
        ENV_FLOOR
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ClickVoice {
    pub start_frame: u64,
    pub active: bool,
    pos: usize,
}

impl ClickVoice {
    pub fn new(start_frame: u64) -> Self {
        Self { start_frame, active: true, pos: 0 }
    }

    pub fn started(&self, frame: u64) -> bool {
        self.pos > 0 || self.start_frame < frame
    }

    pub fn render_into(&mut self, shape: &ClickShape, out: &mut [StereoFrame], block_start: u64) {
        if !self.active {
            return;
        }
        let skip = self.start_frame.saturating_sub(block_start);
        if skip >= out.len() as u64 {
            return;
        }
        let samples = shape.samples();
        for frame in out[skip as usize..].iter_mut() {
            if self.pos >= samples.len() {
                break;
            }
            *frame += StereoFrame::mono(samples[self.pos]);
            self.pos += 1;
        }
        if self.pos >= samples.len() {
            self.active = false;
        }
    }
}
