// Fallback estimator: pick loud peaks out of an RMS envelope and vote on the
// spacing between them.
use super::TempoEstimator;
use crate::config::TempoConfig;

const ENVELOPE_RATE: u32 = 100; // envelope frames per second
const PEAK_SKIP_SECS: f32 = 0.25;
const MAX_NEIGHBOURS: usize = 10;
// every interval is folded into one octave before voting
const FOLD_LOW_BPM: f32 = 90.0;
const FOLD_HIGH_BPM: f32 = 180.0;
const GROUP_TOLERANCE_BPM: f32 = 0.5;

pub struct PeakIntervalHistogram {
    min_bpm: f32,
    max_bpm: f32,
}

impl PeakIntervalHistogram {
    pub fn new(config: &TempoConfig) -> Self {
        Self { min_bpm: config.min_bpm, max_bpm: config.max_bpm }
    }
}

fn rms_envelope(samples: &[f32], hop: usize) -> Vec<f32> {
    samples
        .chunks_exact(hop)
        .map(|c| (c.iter().map(|s| s * s).sum::<f32>() / hop as f32).sqrt())
        .collect()
}

fn pick_peaks(env: &[f32], skip: usize) -> Vec<usize> {
    let n = env.len() as f32;
    let mean = env.iter().sum::<f32>() / n;
    let sd = (env.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n).sqrt();
    let threshold = mean + sd;

    let mut peaks = Vec::new();
    let mut i = 1;
    while i + 1 < env.len() {
        if env[i] > threshold && env[i] >= env[i - 1] && env[i] >= env[i + 1] {
            peaks.push(i);
            i += skip.max(1);
        } else {
            i += 1;
        }
    }
    peaks
}

fn fold(mut bpm: f32) -> f32 {
    while bpm < FOLD_LOW_BPM {
        bpm *= 2.0;
    }
    while bpm > FOLD_HIGH_BPM {
        bpm /= 2.0;
    }
    bpm
}

impl TempoEstimator for PeakIntervalHistogram {
    fn estimate(&self, window: &[f32], sample_rate: u32) -> Option<f32> {
        let hop = (sample_rate / ENVELOPE_RATE).max(1) as usize;
        let rate = sample_rate as f32 / hop as f32;
        let env = rms_envelope(window, hop);
        if env.len() < 3 {
            return None;
        }

        let peaks = pick_peaks(&env, (rate * PEAK_SKIP_SECS) as usize);
        if peaks.len() < 3 {
            return None;
        }

        let mut groups: Vec<(f32, f32, u32)> = Vec::new(); // (anchor, bpm sum, votes)
        for (a, &from) in peaks.iter().enumerate() {
            for &to in peaks[a + 1..].iter().take(MAX_NEIGHBOURS) {
                let bpm = fold(60.0 * rate / (to - from) as f32);
                match groups.iter_mut().find(|g| (g.0 - bpm).abs() < GROUP_TOLERANCE_BPM) {
                    Some(group) => {
                        group.1 += bpm;
                        group.2 += 1;
                    }
                    None => groups.push((bpm, bpm, 1)),
                }
            }
        }

        let (_, sum, votes) = groups.into_iter().max_by_key(|g| g.2)?;
        let bpm = sum / votes as f32;
        log::debug!("interval histogram: {:.2} bpm from {} votes", bpm, votes);
        (self.min_bpm..=self.max_bpm).contains(&bpm).then_some(bpm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tempo::test_signals::click_track;

    #[test]
    fn finds_steady_pulse_at_44k() {
        let estimator = PeakIntervalHistogram::new(&TempoConfig::default());
        for bpm in [100.0, 120.0] {
            let signal = click_track(bpm, 12.0, 44_100);
            let found = estimator.estimate(&signal, 44_100).unwrap();
            assert!((found - bpm).abs() < 1.0, "expected {bpm}, got {found}");
        }
    }

    #[test]
    fn needs_three_peaks() {
        let estimator = PeakIntervalHistogram::new(&TempoConfig::default());
        let signal = click_track(30.0, 3.0, 44_100); // two clicks
        assert_eq!(estimator.estimate(&signal, 44_100), None);
    }

    #[test]
    fn folds_into_one_octave() {
        assert_eq!(fold(60.0), 120.0);
        assert_eq!(fold(200.0), 100.0);
        assert_eq!(fold(150.0), 150.0);
    }
}
