use serde::{Deserialize, Serialize};

const INITIAL_NOISE_FLOOR: f32 = 0.004;
// re-arm once the envelope is back under max(noise * 1.2, hit envelope * 0.4)
const REARM_NOISE_RATIO: f32 = 1.2;
const REARM_PEAK_RATIO: f32 = 0.4;
const MIN_DEBOUNCE_MS: f32 = 20.0;
const MAX_DEBOUNCE_MS: f32 = 250.0;

/// Tuning for the onset detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetProfile {
    pub sensitivity: f32, // threshold = noise floor * sensitivity
    pub debounce_ms: f32,
    pub noise_up: f32,
    pub noise_down: f32,
    pub smoothing: f32, // envelope EMA coefficient
}

impl Default for OnsetProfile {
    fn default() -> Self {
        Self::standard()
    }
}

impl OnsetProfile {
    pub fn standard() -> Self {
        Self {
            sensitivity: 1.5,
            debounce_ms: 180.0,
            noise_up: 0.08,
            noise_down: 0.005,
            smoothing: 0.92,
        }
    }

    // for drums: higher threshold, slower to re-trigger
    pub fn percussive() -> Self {
        Self {
            sensitivity: 2.5,
            debounce_ms: 250.0,
            noise_up: 0.12,
            noise_down: 0.003,
            smoothing: 0.92,
        }
    }

    fn sanitized(&self) -> Self {
        Self {
            sensitivity: self.sensitivity.max(1.0),
            debounce_ms: self.debounce_ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS),
            noise_up: self.noise_up.clamp(0.0, 1.0),
            noise_down: self.noise_down.clamp(0.0, 1.0),
            smoothing: self.smoothing.clamp(0.0, 0.999),
        }
    }
}

/// What one analysis frame produced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OnsetFrame {
    pub time_secs: f64, // start of the frame
    pub envelope: f32,
    pub above_threshold: bool,
    pub hit: bool,
}

pub struct OnsetDetector {
    profile: OnsetProfile,
    sample_rate: f64,
    samples_seen: u64,
    envelope: Option<f32>, // None until the first frame
    last_envelope: f32,
    last_slope: f32,
    noise_floor: f32,
    armed: bool,
    last_hit: Option<f64>,
    last_hit_envelope: f32,
}

impl OnsetDetector {
    pub fn new(profile: &OnsetProfile, sample_rate: u32) -> Self {
        Self {
            profile: profile.sanitized(),
            sample_rate: sample_rate.max(1) as f64,
            samples_seen: 0,
            envelope: None,
            last_envelope: 0.0,
            last_slope: 0.0,
            noise_floor: INITIAL_NOISE_FLOOR,
            armed: true,
            last_hit: None,
            last_hit_envelope: 0.0,
        }
    }

    pub fn noise_floor(&self) -> f32 {
        self.noise_floor
    }

    pub fn process_frame(&mut self, frame: &[f32]) -> OnsetFrame {
        let now = self.samples_seen as f64 / self.sample_rate;
        self.samples_seen += frame.len() as u64;

        let energy = if frame.is_empty() {
            0.0
        } else {
            (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt()
        };

        let p = &self.profile;
        let previous = match self.envelope {
            Some(env) => env,
            None => {
                // start from wherever the room is instead of ramping up from zero
                self.last_envelope = energy;
                self.noise_floor = self.noise_floor.max(energy);
                energy
            }
        };
        let envelope = p.smoothing * previous + (1.0 - p.smoothing) * energy;
        self.envelope = Some(envelope);

        let slope = envelope - self.last_envelope;
        let threshold = self.noise_floor * p.sensitivity;

        if !self.armed {
            let rearm = (self.noise_floor * REARM_NOISE_RATIO).max(self.last_hit_envelope * REARM_PEAK_RATIO);
            if envelope <= rearm {
                self.armed = true;
            }
        }

        let in_debounce = self
            .last_hit
            .is_some_and(|t| (now - t) * 1000.0 < p.debounce_ms as f64);
        let peaked = self.last_slope > 0.0 && slope <= 0.0 && envelope > threshold;

        let hit = self.armed && !in_debounce && peaked;
        if hit {
            self.last_hit = Some(now);
            self.last_hit_envelope = envelope;
            self.armed = false;
        }

        // The floor follows the envelope: quickly up while nothing is going on,
        // slowly down whenever the envelope drops under it. A disarmed detector
        // that is past its debounce also lets the floor rise, otherwise a
        // louder room would hold it above the re-arm level forever.
        if envelope > self.noise_floor {
            let quiet = self.armed && envelope <= threshold;
            let stuck = !self.armed && !hit && !in_debounce;
            if quiet || stuck {
                self.noise_floor += p.noise_up * (envelope - self.noise_floor);
            }
        } else {
            self.noise_floor += p.noise_down * (envelope - self.noise_floor);
        }

        self.last_envelope = envelope;
        self.last_slope = slope;

        OnsetFrame { time_secs: now, envelope, above_threshold: envelope > threshold, hit }
    }
}

#[cfg(test)]
pub(crate) mod test_signals {
    /// 200 Hz blips decaying over ~30ms, 150ms long, one per entry in `times`.
    pub fn hits(times: &[f32], total_secs: f32, amplitude: f32, sample_rate: u32) -> Vec<f32> {
        let sr = sample_rate as f32;
        let len = (total_secs * sr) as usize;
        let mut out = vec![0.0f32; len];
        for t0 in times {
            let start = (t0 * sr) as usize;
            for i in 0..(0.15 * sr) as usize {
                if start + i >= len {
                    break;
                }
                let t = i as f32 / sr;
                out[start + i] +=
                    amplitude * (std::f32::consts::TAU * 200.0 * t).sin() * (-t / 0.03).exp();
            }
        }
        out
    }

    // uniform noise from a fixed-seed LCG
    pub fn noise(len: usize, amplitude: f32) -> Vec<f32> {
        let mut state: u32 = 0x1234_5678;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                amplitude * ((state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_signals::{hits, noise};
    use super::*;

    const SR: u32 = 44_100;

    fn hit_times(profile: &OnsetProfile, signal: &[f32]) -> Vec<f64> {
        let mut detector = OnsetDetector::new(profile, SR);
        signal
            .chunks_exact(256)
            .map(|frame| detector.process_frame(frame))
            .filter(|f| f.hit)
            .map(|f| f.time_secs)
            .collect()
    }

    #[test]
    fn separate_transients_are_two_hits() {
        let signal = hits(&[0.5, 1.1], 2.0, 0.8, SR);
        let found = hit_times(&OnsetProfile::standard(), &signal);
        assert_eq!(found.len(), 2);
        assert!((found[0] - 0.5).abs() < 0.05);
        assert!((found[1] - 1.1).abs() < 0.05);
    }

    #[test]
    fn transients_inside_debounce_are_one_hit() {
        let signal = hits(&[0.5, 0.6], 2.0, 0.8, SR);
        assert_eq!(hit_times(&OnsetProfile::standard(), &signal).len(), 1);
        assert_eq!(hit_times(&OnsetProfile::percussive(), &signal).len(), 1);
    }

    #[test]
    fn steady_pulse_is_counted() {
        let times: Vec<f32> = (0..13).map(|k| 0.5 + 0.6 * k as f32).collect();
        let signal = hits(&times, 8.5, 0.8, SR);
        let found = hit_times(&OnsetProfile::standard(), &signal);
        assert_eq!(found.len(), 13);
        for pair in found.windows(2) {
            assert!((pair[1] - pair[0] - 0.6).abs() < 0.02);
        }
    }

    #[test]
    fn noise_alone_never_hits() {
        let signal = noise(SR as usize * 3, 0.05);
        assert!(hit_times(&OnsetProfile::standard(), &signal).is_empty());
        assert!(hit_times(&OnsetProfile::percussive(), &signal).is_empty());
    }

    #[test]
    fn louder_room_becomes_the_new_floor() {
        let mut signal = noise(SR as usize, 0.002);
        signal.extend(noise(SR as usize * 6, 0.1));
        let strikes: Vec<f32> = (0..9).map(|k| 1.5 + 0.6 * k as f32).collect();
        for (s, h) in signal.iter_mut().zip(hits(&strikes, 7.0, 0.8, SR)) {
            *s += h;
        }

        let mut detector = OnsetDetector::new(&OnsetProfile::standard(), SR);
        let found: Vec<f64> = signal
            .chunks_exact(256)
            .map(|frame| detector.process_frame(frame))
            .filter(|f| f.hit)
            .map(|f| f.time_secs)
            .collect();

        // the jump in level is one hit, every strike once the floor settles is another
        let settled: Vec<f64> = found.into_iter().filter(|t| *t > 2.0).collect();
        assert_eq!(settled.len(), 8, "{:?}", settled);
        for (t, strike) in settled.iter().zip(&strikes[1..]) {
            assert!((t - *strike as f64).abs() < 0.06, "{} vs {}", t, strike);
        }
        assert!(detector.noise_floor() > 0.03);
    }

    #[test]
    fn debounce_is_clamped() {
        let profile = OnsetProfile { debounce_ms: 5_000.0, ..OnsetProfile::standard() };
        assert_eq!(profile.sanitized().debounce_ms, 250.0);
        let profile = OnsetProfile { debounce_ms: 1.0, ..OnsetProfile::standard() };
        assert_eq!(profile.sanitized().debounce_ms, 20.0);
    }
}
