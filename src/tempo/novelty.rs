// Primary estimator: onset novelty + autocorrelation.
//
// log energy of Hann-windowed frames -> rectified first difference (only
// rises count) -> local mean removed -> light smoothing -> autocorrelation
// over the allowed lag range, weighted toward ~120 BPM so a clean pulse
// doesn't get reported at half or double speed.
use super::TempoEstimator;
use crate::config::TempoConfig;

const LOCAL_MEAN_SECS: f32 = 0.25;
const SMOOTHING: [f32; 5] = [1.0, 2.0, 3.0, 2.0, 1.0];
const PRIOR_CENTER_BPM: f64 = 120.0;
const PRIOR_WIDTH_OCTAVES: f64 = 1.0;

pub struct OnsetAutocorrelation {
    frame_size: usize,
    hop_size: usize,
    min_bpm: f32,
    max_bpm: f32,
}

impl OnsetAutocorrelation {
    pub fn new(config: &TempoConfig) -> Self {
        Self {
            frame_size: config.frame_size.max(16),
            hop_size: config.hop_size.max(1),
            min_bpm: config.min_bpm,
            max_bpm: config.max_bpm,
        }
    }

    // returns the novelty curve and its rate in frames per second
    fn novelty(&self, samples: &[f32], sample_rate: u32) -> (Vec<f32>, f32) {
        let rate = sample_rate as f32 / self.hop_size as f32;
        if samples.len() < self.frame_size {
            return (Vec::new(), rate);
        }

        let n = self.frame_size;
        let window: Vec<f32> = (0..n)
            .map(|i| 0.5 - 0.5 * (std::f32::consts::TAU * i as f32 / n as f32).cos())
            .collect();

        let energies: Vec<f32> = samples
            .windows(n)
            .step_by(self.hop_size)
            .map(|frame| {
                let acc: f32 = frame.iter().zip(&window).map(|(x, w)| (x * w) * (x * w)).sum();
                (1e-10 + acc / n as f32).ln()
            })
            .collect();

        let mut novelty = Vec::with_capacity(energies.len());
        novelty.push(0.0);
        novelty.extend(energies.windows(2).map(|e| (e[1] - e[0]).max(0.0)));

        let novelty = subtract_local_mean(&novelty, (LOCAL_MEAN_SECS * rate) as usize);
        (smooth(&novelty), rate)
    }
}

fn subtract_local_mean(values: &[f32], half: usize) -> Vec<f32> {
    let mut prefix = Vec::with_capacity(values.len() + 1);
    prefix.push(0.0f64);
    for v in values {
        prefix.push(prefix[prefix.len() - 1] + *v as f64);
    }
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(values.len());
            let mean = (prefix[hi] - prefix[lo]) / (hi - lo) as f64;
            (values[i] - mean as f32).max(0.0)
        })
        .collect()
}

fn smooth(values: &[f32]) -> Vec<f32> {
    let half = SMOOTHING.len() / 2;
    let norm: f32 = SMOOTHING.iter().sum();
    (0..values.len())
        .map(|i| {
            let mut acc = 0.0;
            for (j, k) in SMOOTHING.iter().enumerate() {
                // zero padded at both ends
                if let Some(v) = (i + j).checked_sub(half).and_then(|idx| values.get(idx)) {
                    acc += k * v;
                }
            }
            acc / norm
        })
        .collect()
}

fn tempo_prior(bpm: f64) -> f64 {
    let octaves = (bpm / PRIOR_CENTER_BPM).log2() / PRIOR_WIDTH_OCTAVES;
    (-0.5 * octaves * octaves).exp()
}

impl TempoEstimator for OnsetAutocorrelation {
    fn estimate(&self, window: &[f32], sample_rate: u32) -> Option<f32> {
        let (novelty, rate) = self.novelty(window, sample_rate);
        let n = novelty.len();
        if n < 4 {
            return None;
        }
        let rate = rate as f64;

        let mean = novelty.iter().map(|v| *v as f64).sum::<f64>() / n as f64;
        let x: Vec<f64> = novelty.iter().map(|v| *v as f64 - mean).collect();
        let energy: f64 = x.iter().map(|v| v * v).sum();
        if energy <= 1e-12 {
            return None; // flat novelty, nothing to correlate
        }

        let min_lag = ((60.0 * rate / self.max_bpm as f64).floor() as usize).max(1);
        let max_lag = ((60.0 * rate / self.min_bpm as f64).ceil() as usize).min(n - 2);
        if min_lag > max_lag {
            return None;
        }

        // r[k] is the normalized autocorrelation at lag (min_lag - 1 + k)
        let first = min_lag - 1;
        let r: Vec<f64> = (first..=max_lag + 1)
            .map(|lag| {
                let acc: f64 = x[..n - lag].iter().zip(&x[lag..]).map(|(a, b)| a * b).sum();
                acc / (n - lag) as f64 / (energy / n as f64)
            })
            .collect();

        let mut best = min_lag;
        let mut best_score = f64::NEG_INFINITY;
        for lag in min_lag..=max_lag {
            let score = r[lag - first] * tempo_prior(60.0 * rate / lag as f64);
            if score > best_score {
                best_score = score;
                best = lag;
            }
        }

        let peak = r[best - first];
        if peak <= 0.0 {
            return None;
        }

        // parabolic interpolation around the best lag
        let (a, c) = (r[best - first - 1], r[best - first + 1]);
        let denom = a - 2.0 * peak + c;
        let frac = if denom.abs() > 1e-12 { (0.5 * (a - c) / denom).clamp(-0.5, 0.5) } else { 0.0 };

        let bpm = 60.0 * rate / (best as f64 + frac);
        log::debug!("autocorrelation: lag {} ({:+.2}) r={:.3} -> {:.2} bpm", best, frac, peak, bpm);
        Some(bpm as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tempo::test_signals::click_track;

    #[test]
    fn finds_steady_pulse() {
        let estimator = OnsetAutocorrelation::new(&TempoConfig::default());
        for bpm in [90.0, 100.0, 120.0, 140.0] {
            let signal = click_track(bpm, 15.0, 22_050);
            let found = estimator.estimate(&signal, 22_050).unwrap();
            assert!((found - bpm).abs() < 1.0, "expected {bpm}, got {found}");
        }
    }

    #[test]
    fn silence_gives_nothing() {
        let estimator = OnsetAutocorrelation::new(&TempoConfig::default());
        assert_eq!(estimator.estimate(&vec![0.0; 22_050 * 10], 22_050), None);
        assert_eq!(estimator.estimate(&[0.5; 100], 22_050), None);
    }

    #[test]
    fn smoothing_is_zero_padded() {
        let out = smooth(&[9.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(out[0], 3.0);
        assert_eq!(out[1], 2.0);
        assert_eq!(out[2], 1.0);
        assert_eq!(out[3], 0.0);
    }
}
