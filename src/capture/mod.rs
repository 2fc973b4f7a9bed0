use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::audio::{InputSink, InputStream, Microphone};
use crate::config::CaptureConfig;
use crate::error::EngineResult;

mod mp3;
mod takes;
mod wav;

pub use mp3::{encode_mp3, normalize};
pub use takes::{SavedTake, save_take};
pub use wav::{encode_wav, float_to_pcm16};

// sized for the fastest device we expect, the real rate is only known once open
const MAX_INPUT_RATE: f32 = 192_000.0;

/// One finished recording.
#[derive(Clone, Debug)]
pub struct Take {
    pub wav: Vec<u8>,
    pub mp3: Option<Vec<u8>>,
    pub sample_rate: u32,
    pub samples: usize,
}

impl Take {
    pub fn duration_secs(&self) -> f64 {
        self.samples as f64 / self.sample_rate.max(1) as f64
    }
}

// ── Input callback side ───────────────────────────────────────────

// Runs on the input callback. Never blocks or allocates; when the ring is full
// the samples are counted and dropped.
struct ChunkWriter {
    producer: rtrb::Producer<f32>,
    recording: Arc<AtomicBool>,
    dropped: Arc<AtomicUsize>,
}

impl InputSink for ChunkWriter {
    fn process(&mut self, samples: &[f32]) {
        if !self.recording.load(Ordering::Acquire) {
            return;
        }
        let mut lost = 0;
        for s in samples {
            if self.producer.push(*s).is_err() {
                lost += 1;
            }
        }
        if lost > 0 {
            self.dropped.fetch_add(lost, Ordering::Relaxed);
        }
    }
}

// ── Control side ──────────────────────────────────────────────────

struct ArmedInput {
    _stream: InputStream, // dropping this closes the microphone
    sample_rate: u32,
    consumer: rtrb::Consumer<f32>,
    recording: Arc<AtomicBool>,
    dropped: Arc<AtomicUsize>,
}

#[derive(Default)]
struct RecordingSession {
    chunks: Vec<Vec<f32>>,
    current: Vec<f32>,
    skip: usize, // lead-in samples still to throw away
}

impl RecordingSession {
    fn sample_count(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum::<usize>() + self.current.len()
    }

    fn merge(self) -> Vec<f32> {
        let mut merged = Vec::with_capacity(self.sample_count());
        for chunk in &self.chunks {
            merged.extend_from_slice(chunk);
        }
        merged.extend_from_slice(&self.current);
        merged
    }
}

// Microphone -> fixed-size chunks -> WAV (+ MP3 when the encoder cooperates).
// arm/disarm own the device, start/stop own the recording.
pub struct CapturePipeline {
    mic: Rc<dyn Microphone>,
    config: CaptureConfig,
    input: Option<ArmedInput>,
    session: Option<RecordingSession>,
}

impl CapturePipeline {
    pub fn new(mic: Rc<dyn Microphone>, config: CaptureConfig) -> Self {
        Self { mic, config, input: None, session: None }
    }

    pub fn is_armed(&self) -> bool {
        self.input.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn arm(&mut self) -> EngineResult<()> {
        if self.input.is_some() {
            return Ok(());
        }
        let capacity = (self.config.ring_secs.max(0.1) * MAX_INPUT_RATE) as usize;
        let (producer, consumer) = rtrb::RingBuffer::<f32>::new(capacity);
        let recording = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicUsize::new(0));

        let writer = ChunkWriter {
            producer,
            recording: Arc::clone(&recording),
            dropped: Arc::clone(&dropped),
        };
        let stream = self.mic.open(Box::new(writer))?;
        log::info!("recording armed ({} Hz)", stream.sample_rate);

        self.input = Some(ArmedInput {
            sample_rate: stream.sample_rate,
            _stream: stream,
            consumer,
            recording,
            dropped,
        });
        Ok(())
    }

    /// Begins collecting, throwing away the first `lead_in_secs` of input so
    /// the take starts with the audio it is played against. Returns false (and
    /// does nothing) unless armed.
    pub fn start(&mut self, lead_in_secs: f64) -> bool {
        let Some(input) = self.input.as_mut() else {
            return false;
        };
        if self.session.is_some() {
            return true;
        }
        // leftovers from a callback racing the previous stop
        while input.consumer.pop().is_ok() {}
        input.dropped.store(0, Ordering::Relaxed);
        input.recording.store(true, Ordering::Release);
        let skip = (lead_in_secs.max(0.0) * input.sample_rate as f64).round() as usize;
        self.session = Some(RecordingSession { skip, ..RecordingSession::default() });
        log::info!("recording started ({} lead-in samples dropped)", skip);
        true
    }

    // Drains the ring into fixed-size chunks. Called from housekeeping.
    pub fn pump(&mut self) {
        let (Some(input), Some(session)) = (self.input.as_mut(), self.session.as_mut()) else {
            return;
        };
        let chunk_size = self.config.chunk_size.max(1);
        while let Ok(s) = input.consumer.pop() {
            if session.skip > 0 {
                session.skip -= 1;
                continue;
            }
            session.current.push(s);
            if session.current.len() == chunk_size {
                let full = std::mem::replace(&mut session.current, Vec::with_capacity(chunk_size));
                session.chunks.push(full);
            }
        }
    }

    /// Ends the recording and encodes it. `Ok(None)` when nothing was being
    /// recorded. A WAV failure loses the take; an MP3 failure only loses the MP3.
    pub fn stop(&mut self) -> EngineResult<Option<Take>> {
        let Some(input) = self.input.as_ref() else {
            return Ok(None);
        };
        if self.session.is_none() {
            return Ok(None);
        }
        input.recording.store(false, Ordering::Release);
        let sample_rate = input.sample_rate;
        let dropped = input.dropped.load(Ordering::Relaxed);

        self.pump();
        let Some(session) = self.session.take() else {
            return Ok(None);
        };
        if dropped > 0 {
            log::warn!("recording overflowed, {} samples lost", dropped);
        }

        let samples = session.merge();
        let wav = encode_wav(&samples, sample_rate, 1)?;
        let mp3 = match encode_mp3(&samples, sample_rate, self.config.mp3_target_peak) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::warn!("mp3 encoding failed, keeping wav only: {}", e);
                None
            }
        };

        let take = Take { wav, mp3, sample_rate, samples: samples.len() };
        log::info!("recording stopped, {:.2}s captured", take.duration_secs());
        Ok(Some(take))
    }

    // Anything not already returned by `stop` is thrown away. Idempotent.
    pub fn disarm(&mut self) {
        if let Some(input) = self.input.take() {
            input.recording.store(false, Ordering::Release);
            if self.session.take().is_some() {
                log::info!("recording discarded");
            }
            drop(input);
            log::info!("recording disarmed");
        }
        self.session = None;
    }
}
