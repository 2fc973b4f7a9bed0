use serde::{Deserialize, Serialize};

// A processing stage is described by data and only turned into a live object
// once the session knows its sample rate. The live analyzer builds its
// pipeline from a list of these and throws it away on stop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageSpec {
    HighPass { cutoff_hz: f32, q: f32 },
    LowPass { cutoff_hz: f32, q: f32 },
    Gain { level: f32 },
}

impl StageSpec {
    pub fn to_stage(&self, sample_rate: u32) -> Box<dyn Stage> {
        match self {
            StageSpec::HighPass { cutoff_hz, q } => {
                Box::new(Biquad::high_pass(sample_rate as f32, *cutoff_hz, *q))
            }
            StageSpec::LowPass { cutoff_hz, q } => {
                Box::new(Biquad::low_pass(sample_rate as f32, *cutoff_hz, *q))
            }
            StageSpec::Gain { level } => Box::new(Gain { level: level.max(0.0) }),
        }
    }

    pub fn label(&self) -> String {
        match self {
            StageSpec::HighPass { cutoff_hz, .. } => format!("HP({})", cutoff_hz),
            StageSpec::LowPass { cutoff_hz, .. } => format!("LP({})", cutoff_hz),
            StageSpec::Gain { level } => format!("Gain({})", level),
        }
    }
}

pub trait Stage: Send {
    fn process(&mut self, buf: &mut [f32]);
}

/// Ordered chain of stages, run in place over mono blocks.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn from_specs(specs: &[StageSpec], sample_rate: u32) -> Self {
        Self {
            stages: specs.iter().map(|s| s.to_stage(sample_rate)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn process(&mut self, buf: &mut [f32]) {
        for stage in &mut self.stages {
            stage.process(buf);
        }
    }
}

// ── Biquad ────────────────────────────────────────────────────────

// RBJ cookbook coefficients, transposed direct form II
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl Biquad {
    pub fn low_pass(sample_rate: f32, cutoff_hz: f32, q: f32) -> Self {
        let (cos, alpha) = Self::prewarp(sample_rate, cutoff_hz, q);
        let b1 = 1.0 - cos;
        Self::normalized(b1 * 0.5, b1, b1 * 0.5, 1.0 + alpha, -2.0 * cos, 1.0 - alpha)
    }

    pub fn high_pass(sample_rate: f32, cutoff_hz: f32, q: f32) -> Self {
        let (cos, alpha) = Self::prewarp(sample_rate, cutoff_hz, q);
        let b0 = (1.0 + cos) * 0.5;
        Self::normalized(b0, -(1.0 + cos), b0, 1.0 + alpha, -2.0 * cos, 1.0 - alpha)
    }

    fn prewarp(sample_rate: f32, cutoff_hz: f32, q: f32) -> (f32, f32) {
        let cutoff = cutoff_hz.clamp(1.0, sample_rate * 0.49);
        let w0 = std::f32::consts::TAU * cutoff / sample_rate;
        let alpha = w0.sin() / (2.0 * q.max(0.01));
        (w0.cos(), alpha)
    }

    fn normalized(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }
}

impl Stage for Biquad {
    fn process(&mut self, buf: &mut [f32]) {
        for s in buf.iter_mut() {
            let x = *s;
            let y = self.b0 * x + self.z1;
            self.z1 = self.b1 * x - self.a1 * y + self.z2;
            self.z2 = self.b2 * x - self.a2 * y;
            *s = y;
        }
    }
}

// ── Gain ──────────────────────────────────────────────────────────

struct Gain {
    level: f32,
}

impl Stage for Gain {
    fn process(&mut self, buf: &mut [f32]) {
        for s in buf.iter_mut() {
            *s *= self.level;
        }
    }
}

/// One-pole smoothed gain, so level changes never click.
#[derive(Clone, Copy, Debug)]
pub struct GainRamp {
    current: f32,
    target: f32,
    coeff: f32,
}

impl GainRamp {
    pub fn new(level: f32, time_constant_secs: f32, sample_rate: u32) -> Self {
        let samples = time_constant_secs * sample_rate as f32;
        let coeff = if samples > 0.0 { (-1.0 / samples).exp() } else { 0.0 };
        Self { current: level, target: level, coeff }
    }

    pub fn set_target(&mut self, level: f32) {
        self.target = level;
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        self.current = self.target + (self.current - self.target) * self.coeff;
        self.current
    }
}
