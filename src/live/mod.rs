use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::audio::{InputSink, InputStream, Microphone, Pipeline, StageSpec};
use crate::config::LiveConfig;
use crate::error::EngineResult;

mod onset;
mod tempo;

pub use onset::{OnsetDetector, OnsetFrame, OnsetProfile};
pub use tempo::{LiveTempo, autocorrelate_bpm};

// analysis frames the callback may run ahead of the control thread
const FRAME_QUEUE: usize = 4096;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimingFeedback {
    Rushing,
    Dragging,
    OnTime,
    #[default]
    Unknown,
}

impl TimingFeedback {
    pub fn label(self) -> &'static str {
        match self {
            TimingFeedback::Rushing => "rushing",
            TimingFeedback::Dragging => "dragging",
            TimingFeedback::OnTime => "on time",
            TimingFeedback::Unknown => "-",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LiveStats {
    pub current_bpm: Option<f32>,
    pub confidence: f32,
    pub accuracy: f32, // 0..=100
    pub feedback: TimingFeedback,
    pub hit_count: usize,
}

/// Accuracy (0-100) and feedback for a played tempo against a target,
/// compared on beat intervals. More than 10% off either way is rushing or
/// dragging.
pub fn timing_feedback(current_bpm: Option<f32>, target_bpm: f32) -> (f32, TimingFeedback) {
    let Some(current) = current_bpm.map(f32::round).filter(|b| *b > 0.0) else {
        return (0.0, TimingFeedback::Unknown);
    };
    if !(target_bpm > 0.0 && target_bpm.is_finite()) {
        return (0.0, TimingFeedback::Unknown);
    }
    let target_ms = 60_000.0 / target_bpm;
    let current_ms = 60_000.0 / current;
    let diff = current_ms - target_ms;
    let accuracy = (100.0 - diff.abs() / target_ms * 100.0).max(0.0).round();

    let tolerance = target_ms * 0.1;
    let feedback = if diff < -tolerance {
        TimingFeedback::Rushing
    } else if diff > tolerance {
        TimingFeedback::Dragging
    } else {
        TimingFeedback::OnTime
    };
    (accuracy, feedback)
}

// ── Input callback side ───────────────────────────────────────────

// Filters and detects onsets inside the input callback. Only analysis frames
// cross to the control thread.
struct AnalysisSink {
    stages: Vec<StageSpec>,
    profile: OnsetProfile,
    frame_size: usize,
    frame: Vec<f32>,
    state: Option<(Pipeline, OnsetDetector)>, // built in prepare
    producer: rtrb::Producer<OnsetFrame>,
    dropped: Arc<AtomicUsize>,
}

impl InputSink for AnalysisSink {
    fn prepare(&mut self, sample_rate: u32) {
        let pipeline = Pipeline::from_specs(&self.stages, sample_rate);
        let detector = OnsetDetector::new(&self.profile, sample_rate);
        self.state = Some((pipeline, detector));
        self.frame.clear();
    }

    fn process(&mut self, samples: &[f32]) {
        let Some((pipeline, detector)) = self.state.as_mut() else {
            return;
        };
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.frame_size - self.frame.len()).min(rest.len());
            self.frame.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.frame.len() < self.frame_size {
                break;
            }
            pipeline.process(&mut self.frame);
            let result = detector.process_frame(&self.frame);
            self.frame.clear();
            if self.producer.push(result).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

// ── Control side ──────────────────────────────────────────────────

struct LiveSession {
    _stream: InputStream, // dropping this closes the microphone
    consumer: rtrb::Consumer<OnsetFrame>,
    dropped: Arc<AtomicUsize>,
    tempo: LiveTempo,
}

pub struct LiveAnalyzer {
    mic: Rc<dyn Microphone>,
    config: LiveConfig,
    target_bpm: f32,
    session: Option<LiveSession>,
}

impl LiveAnalyzer {
    pub fn new(mic: Rc<dyn Microphone>, config: LiveConfig) -> Self {
        let target_bpm = if config.target_bpm > 0.0 { config.target_bpm } else { 120.0 };
        Self { mic, config, target_bpm, session: None }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn target_bpm(&self) -> f32 {
        self.target_bpm
    }

    pub fn set_target_bpm(&mut self, bpm: f32) {
        if bpm > 0.0 && bpm.is_finite() {
            self.target_bpm = bpm;
        }
    }

    /// Opens the microphone and starts a fresh analysis. No-op while running.
    pub fn start(&mut self) -> EngineResult<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let (producer, consumer) = rtrb::RingBuffer::<OnsetFrame>::new(FRAME_QUEUE);
        let dropped = Arc::new(AtomicUsize::new(0));
        let frame_size = self.config.frame_size.max(1);
        let sink = AnalysisSink {
            stages: self.config.stages.clone(),
            profile: self.config.profile.clone(),
            frame_size,
            frame: Vec::with_capacity(frame_size),
            state: None,
            producer,
            dropped: Arc::clone(&dropped),
        };
        let stream = self.mic.open(Box::new(sink))?;
        let tempo = LiveTempo::new(&self.config, stream.sample_rate);
        log::info!(
            "live analysis started ({} Hz, stages: {})",
            stream.sample_rate,
            self.config.stages.iter().map(StageSpec::label).collect::<Vec<_>>().join(" -> ")
        );
        self.session = Some(LiveSession { _stream: stream, consumer, dropped, tempo });
        Ok(())
    }

    // Idempotent. Tears down the stream and all detector state.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            let dropped = session.dropped.load(Ordering::Relaxed);
            if dropped > 0 {
                log::warn!("live analysis fell behind, {} frames lost", dropped);
            }
            drop(session);
            log::info!("live analysis stopped");
        }
    }

    /// Drains frames produced since the last call and returns fresh stats.
    pub fn poll(&mut self) -> LiveStats {
        if let Some(session) = self.session.as_mut() {
            while let Ok(frame) = session.consumer.pop() {
                session.tempo.push(frame);
            }
        }
        self.stats()
    }

    pub fn stats(&self) -> LiveStats {
        let Some(session) = self.session.as_ref() else {
            return LiveStats::default();
        };
        let current_bpm = session.tempo.bpm();
        let (accuracy, feedback) = timing_feedback(current_bpm, self.target_bpm);
        LiveStats {
            current_bpm,
            confidence: session.tempo.confidence(),
            accuracy,
            feedback,
            hit_count: session.tempo.hit_count(),
        }
    }
}
