use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, TryRecvError};

use crate::audio::{DecodedTrack, resample_linear};
use crate::config::TempoConfig;
use crate::error::{EngineError, EngineResult};

mod intervals;
mod novelty;

pub use intervals::PeakIntervalHistogram;
pub use novelty::OnsetAutocorrelation;

/// Something that can turn a window of mono audio into a tempo.
pub trait TempoEstimator: Send {
    fn estimate(&self, window: &[f32], sample_rate: u32) -> Option<f32>;
}

// every successful window votes with the same weight for now
const WINDOW_CONFIDENCE: f32 = 1.0;

pub struct TempoDetector {
    config: TempoConfig,
    primary: Box<dyn TempoEstimator>,
    fallback: Box<dyn TempoEstimator>,
}

impl TempoDetector {
    pub fn new(config: TempoConfig) -> Self {
        let primary = Box::new(OnsetAutocorrelation::new(&config));
        let fallback = Box::new(PeakIntervalHistogram::new(&config));
        Self::with_estimators(config, primary, fallback)
    }

    pub fn with_estimators(
        config: TempoConfig,
        primary: Box<dyn TempoEstimator>,
        fallback: Box<dyn TempoEstimator>,
    ) -> Self {
        Self { config, primary, fallback }
    }

    pub fn detect(&self, track: &DecodedTrack) -> EngineResult<f32> {
        self.detect_cancellable(track, &AtomicBool::new(false))
    }

    pub fn detect_cancellable(&self, track: &DecodedTrack, cancel: &AtomicBool) -> EngineResult<f32> {
        let mut mono = track.mono_mix();
        let peak = mono.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        if peak <= f32::EPSILON {
            return Err(EngineError::Detection("input is silent".into()));
        }
        let inv = 1.0 / peak;
        mono.iter_mut().for_each(|s| *s *= inv);

        let sample_rate = track.sample_rate();
        let mut candidates: Vec<(f32, f32)> = Vec::new();

        for (start, end) in self.windows(mono.len(), sample_rate) {
            if cancel.load(Ordering::Acquire) {
                return Err(EngineError::Cancelled);
            }
            let window = &mono[start..end];
            if let Some(bpm) = self.estimate_window(window, sample_rate) {
                log::debug!(
                    "window {:.1}s-{:.1}s: {:.2} bpm",
                    start as f64 / sample_rate as f64,
                    end as f64 / sample_rate as f64,
                    bpm
                );
                candidates.push((bpm, WINDOW_CONFIDENCE));
            }
        }

        let bpm = weighted_median(&candidates)
            .ok_or_else(|| EngineError::Detection("no window produced a tempo".into()))?
            .round();
        log::info!("detected {} bpm from {} windows", bpm, candidates.len());
        Ok(bpm)
    }

    fn estimate_window(&self, window: &[f32], sample_rate: u32) -> Option<f32> {
        let valid = |bpm: &f32| bpm.is_finite() && *bpm > 0.0;
        if let Some(bpm) = self.primary.estimate(window, sample_rate).filter(valid) {
            return Some(bpm);
        }
        let target = self.config.fallback_sample_rate;
        let resampled = resample_linear(window, sample_rate, target);
        self.fallback.estimate(&resampled, target).filter(valid)
    }

    // (start, end) sample ranges. The effective window and hop never go below
    // their configured minimums, and short trailing windows are dropped.
    fn windows(&self, len: usize, sample_rate: u32) -> Vec<(usize, usize)> {
        let sr = sample_rate as f64;
        let window = (self.config.window_secs.max(self.config.min_window_secs) * sr) as usize;
        let hop = ((self.config.hop_secs.max(self.config.min_hop_secs) * sr) as usize).max(1);
        let min_tail = (self.config.min_tail_secs * sr) as usize;

        if len < min_tail {
            return vec![(0, len)];
        }
        (0..len)
            .step_by(hop)
            .map(|start| (start, (start + window).min(len)))
            .filter(|(start, end)| end - start >= min_tail)
            .collect()
    }
}

/// Median of `(bpm, weight)` pairs where each pair counts `weight` times.
/// Non-positive weights count as 1.
pub fn weighted_median(candidates: &[(f32, f32)]) -> Option<f32> {
    if candidates.is_empty() {
        return None;
    }
    let mut sorted: Vec<(f32, f32)> = candidates
        .iter()
        .map(|&(bpm, w)| (bpm, if w > 0.0 { w } else { 1.0 }))
        .collect();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let half = sorted.iter().map(|c| c.1).sum::<f32>() / 2.0;
    let mut acc = 0.0;
    for (bpm, w) in &sorted {
        acc += w;
        if acc >= half {
            return Some(*bpm);
        }
    }
    sorted.last().map(|c| c.0)
}

// ── Background job ────────────────────────────────────────────────

/// Tempo detection on its own thread. Poll `try_result` from the control loop.
pub struct DetectionJob {
    rx: Receiver<EngineResult<f32>>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DetectionJob {
    pub fn spawn(detector: TempoDetector, track: Arc<DecodedTrack>) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);

        let worker = std::thread::Builder::new()
            .name("tempo-detect".into())
            .spawn(move || {
                let result = detector.detect_cancellable(&track, &flag);
                let _ = tx.send(result);
            });

        match worker {
            Ok(handle) => Self { rx, cancel, worker: Some(handle) },
            Err(e) => {
                // no thread, so report the failure through the channel ourselves
                let (tx, rx) = crossbeam_channel::bounded(1);
                let _ = tx.send(Err(EngineError::Io(e)));
                Self { rx, cancel, worker: None }
            }
        }
    }

    pub fn try_result(&self) -> Option<EngineResult<f32>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                Some(Err(EngineError::Detection("detection worker exited".into())))
            }
        }
    }

    // blocks until the worker reports
    pub fn wait(mut self) -> EngineResult<f32> {
        let result = self
            .rx
            .recv()
            .unwrap_or_else(|_| Err(EngineError::Detection("detection worker exited".into())));
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        result
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }
}

impl Drop for DetectionJob {
    fn drop(&mut self) {
        // the worker finishes on its own at the next window boundary
        self.cancel();
    }
}


#[cfg(test)]
mod tests {
    use super::test_signals::click_track;
    use super::*;

    struct Fixed(Option<f32>);

    impl TempoEstimator for Fixed {
        fn estimate(&self, _window: &[f32], _sample_rate: u32) -> Option<f32> {
            self.0
        }
    }

    // blocks on its first call until the test lets it through
    struct Gated(crossbeam_channel::Receiver<()>);

    impl TempoEstimator for Gated {
        fn estimate(&self, _window: &[f32], _sample_rate: u32) -> Option<f32> {
            let _ = self.0.recv();
            Some(120.0)
        }
    }

    fn noise_track(secs: f32, sample_rate: u32) -> DecodedTrack {
        let len = (secs * sample_rate as f32) as usize;
        let samples = (0..len).map(|i| if i % 7 == 0 { 0.5 } else { -0.1 }).collect();
        DecodedTrack::from_mono(sample_rate, samples).unwrap()
    }

    #[test]
    fn weighted_median_picks_half_weight_point() {
        let candidates = [(120.0, 1.0), (60.0, 1.0), (90.0, 1.0), (90.0, 1.0)];
        assert_eq!(weighted_median(&candidates), Some(90.0));
        assert_eq!(weighted_median(&[]), None);
    }

    #[test]
    fn weighted_median_treats_bad_weights_as_one() {
        let candidates = [(100.0, 0.0), (110.0, -3.0), (140.0, 1.0)];
        assert_eq!(weighted_median(&candidates), Some(110.0));
    }

    #[test]
    fn detects_click_track() {
        let track = DecodedTrack::from_mono(22_050, click_track(120.0, 20.0, 22_050)).unwrap();
        let bpm = TempoDetector::new(TempoConfig::default()).detect(&track).unwrap();
        assert_eq!(bpm, 120.0);
    }

    #[test]
    fn silence_is_a_detection_error() {
        let track = DecodedTrack::from_mono(8_000, vec![0.0; 8_000 * 20]).unwrap();
        let err = TempoDetector::new(TempoConfig::default()).detect(&track);
        assert!(matches!(err, Err(EngineError::Detection(_))));
    }

    #[test]
    fn falls_back_when_primary_fails_or_is_nonsense() {
        let track = noise_track(20.0, 8_000);
        for primary in [None, Some(f32::NAN), Some(-4.0)] {
            let detector = TempoDetector::with_estimators(
                TempoConfig::default(),
                Box::new(Fixed(primary)),
                Box::new(Fixed(Some(101.4))),
            );
            assert_eq!(detector.detect(&track).unwrap(), 101.0);
        }
    }

    #[test]
    fn both_estimators_failing_is_an_error() {
        let detector = TempoDetector::with_estimators(
            TempoConfig::default(),
            Box::new(Fixed(None)),
            Box::new(Fixed(None)),
        );
        let err = detector.detect(&noise_track(12.0, 8_000));
        assert!(matches!(err, Err(EngineError::Detection(_))));
    }

    #[test]
    fn windows_respect_minimums_and_drop_short_tail() {
        let detector = TempoDetector::new(TempoConfig::default());
        // 60s at 10 Hz: 15s windows every 5s, the 5s tail is dropped
        let windows = detector.windows(600, 10);
        assert_eq!(windows.first(), Some(&(0, 150)));
        assert_eq!(windows.last(), Some(&(500, 600)));
        assert_eq!(windows.len(), 11);
        // shorter than the tail limit: one window over everything
        assert_eq!(detector.windows(42, 10), vec![(0, 42)]);
    }

    #[test]
    fn job_reports_result() {
        let track = Arc::new(noise_track(12.0, 8_000));
        let detector = TempoDetector::with_estimators(
            TempoConfig::default(),
            Box::new(Fixed(Some(133.0))),
            Box::new(Fixed(None)),
        );
        assert_eq!(DetectionJob::spawn(detector, track).wait().unwrap(), 133.0);
    }

    #[test]
    fn job_can_be_cancelled_between_windows() {
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let detector = TempoDetector::with_estimators(
            TempoConfig::default(),
            Box::new(Gated(gate_rx)),
            Box::new(Fixed(None)),
        );
        let job = DetectionJob::spawn(detector, Arc::new(noise_track(40.0, 1_000)));
        job.cancel();
        gate_tx.send(()).unwrap();
        assert!(matches!(job.wait(), Err(EngineError::Cancelled)));
    }
}
