use std::collections::VecDeque;

use super::onset::OnsetFrame;
use crate::config::LiveConfig;

/// Autocorrelation of an envelope over the lags covering `min_bpm..=max_bpm`.
/// Returns (bpm, normalized correlation at the best lag).
pub fn autocorrelate_bpm(envelope: &[f32], frame_rate: f32, min_bpm: f32, max_bpm: f32) -> Option<(f32, f32)> {
    let n = envelope.len();
    if n < 4 || frame_rate <= 0.0 || min_bpm <= 0.0 || max_bpm <= min_bpm {
        return None;
    }
    let mean = envelope.iter().sum::<f32>() / n as f32;
    let x: Vec<f32> = envelope.iter().map(|v| v - mean).collect();
    let energy: f32 = x.iter().map(|v| v * v).sum();
    if energy <= f32::EPSILON {
        return None;
    }

    let min_lag = ((60.0 * frame_rate / max_bpm).floor() as usize).max(1);
    let max_lag = ((60.0 * frame_rate / min_bpm).ceil() as usize).min(n - 1);
    if min_lag >= max_lag {
        return None;
    }

    let corr: Vec<f32> = (min_lag..=max_lag)
        .map(|lag| x[..n - lag].iter().zip(&x[lag..]).map(|(a, b)| a * b).sum::<f32>() / energy)
        .collect();

    let (best, &score) = corr
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;

    let mut lag = (best + min_lag) as f32;
    if best > 0 && best + 1 < corr.len() {
        let (l, c, r) = (corr[best - 1], score, corr[best + 1]);
        let denom = l - 2.0 * c + r;
        if denom.abs() > f32::EPSILON {
            lag += (0.5 * (l - r) / denom).clamp(-0.5, 0.5);
        }
    }
    Some((60.0 * frame_rate / lag, score))
}

// Control-side half of the live analyzer: keeps the recent envelope and hit
// times, re-estimates the tempo at a fixed cadence.
pub struct LiveTempo {
    frame_rate: f32,
    window_frames: usize,
    window_secs: f64,
    analysis_every: usize,
    silence_frames: usize,
    min_bpm: f32,
    max_bpm: f32,
    min_confidence: f32,
    min_hits: usize,
    smoothing: f32,

    envelope: VecDeque<f32>,
    hits: VecDeque<f64>,
    total_hits: usize,
    since_analysis: usize,
    since_active: usize,
    bpm: Option<f32>,
    confidence: f32,
}

impl LiveTempo {
    pub fn new(config: &LiveConfig, sample_rate: u32) -> Self {
        let frame_rate = sample_rate.max(1) as f32 / config.frame_size.max(1) as f32;
        let window_frames = ((config.bpm_window_secs.max(1.0) * frame_rate) as usize).max(1);
        Self {
            frame_rate,
            window_frames,
            window_secs: config.bpm_window_secs.max(1.0) as f64,
            analysis_every: ((config.analysis_interval_secs.max(0.05) * frame_rate) as usize).max(1),
            silence_frames: (config.silence_timeout_secs.max(0.0) * frame_rate) as usize,
            min_bpm: config.min_bpm,
            max_bpm: config.max_bpm,
            min_confidence: config.min_confidence,
            min_hits: config.min_hits,
            smoothing: config.bpm_smoothing.clamp(0.0, 1.0),
            envelope: VecDeque::with_capacity(window_frames),
            hits: VecDeque::new(),
            total_hits: 0,
            since_analysis: 0,
            since_active: 0,
            bpm: None,
            confidence: 0.0,
        }
    }

    pub fn bpm(&self) -> Option<f32> {
        self.bpm
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn hit_count(&self) -> usize {
        self.total_hits
    }

    pub fn push(&mut self, frame: OnsetFrame) {
        if self.envelope.len() == self.window_frames {
            self.envelope.pop_front();
        }
        self.envelope.push_back(frame.envelope);

        if frame.hit {
            self.hits.push_back(frame.time_secs);
            self.total_hits += 1;
        }
        while self.hits.front().is_some_and(|t| frame.time_secs - t > self.window_secs) {
            self.hits.pop_front();
        }

        if frame.above_threshold {
            self.since_active = 0;
        } else {
            self.since_active += 1;
            if self.since_active > self.silence_frames && self.bpm.is_some() {
                log::debug!("live tempo reset after silence");
                self.bpm = None;
                self.confidence = 0.0;
            }
        }

        self.since_analysis += 1;
        if self.since_analysis >= self.analysis_every {
            self.since_analysis = 0;
            self.analyze();
        }
    }

    fn analyze(&mut self) {
        if self.since_active > self.silence_frames || self.hits.len() < self.min_hits {
            return;
        }
        let envelope = self.envelope.make_contiguous();
        let Some((bpm, score)) = autocorrelate_bpm(envelope, self.frame_rate, self.min_bpm, self.max_bpm) else {
            return;
        };
        if score < self.min_confidence || !bpm.is_finite() {
            return;
        }
        self.bpm = Some(match self.bpm {
            Some(prev) => prev + self.smoothing * (bpm - prev),
            None => bpm,
        });
        self.confidence = score;
    }
}
