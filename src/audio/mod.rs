use crossbeam_channel::Receiver;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio_api::{AudioCommand, CommandSender};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

mod click;
mod clock;
mod engine;
mod frame;
mod input;
mod stage;
mod track;
mod track_id;
mod voice;

pub use click::ClickShape;
pub use clock::AudioClock;
pub use frame::StereoFrame;
pub use input::{CpalMicrophone, InputSink, InputStream, Microphone};
#[cfg(test)]
pub(crate) use input::testing::FakeMicrophone;
pub use stage::{GainRamp, Pipeline, Stage, StageSpec};
pub use track::{DecodedTrack, resample_linear};
pub use track_id::{TrackId, next_track_id};

use engine::Engine;

pub struct AudioHandle {
    commands: CommandSender,
    clock: AudioClock,
    _output_stream: cpal::Stream,
}

impl AudioHandle {
    pub fn send(&self, cmd: AudioCommand) {
        self.commands.send(cmd);
    }

    pub fn commands(&self) -> CommandSender {
        self.commands.clone()
    }

    pub fn clock(&self) -> AudioClock {
        self.clock.clone()
    }
}

pub fn start_audio(config: &EngineConfig) -> EngineResult<AudioHandle> {
    let (tx, rx) = crossbeam_channel::bounded::<AudioCommand>(1024);

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| EngineError::Device("no default output device".into()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| EngineError::Device(e.to_string()))?;

    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(EngineError::Device(format!(
            "unsupported sample format {:?} (only f32 supported for now)",
            supported.sample_format()
        )));
    }

    let stream_config: cpal::StreamConfig = supported.into();
    let sample_rate = stream_config.sample_rate.0;
    let clock = AudioClock::new(sample_rate);

    let stream = build_output_stream_f32(&device, &stream_config, rx, clock.clone(), config)?;
    stream.play().map_err(|e| EngineError::Device(e.to_string()))?;

    log::info!(
        "audio output started ({} ch @ {} Hz)",
        stream_config.channels,
        sample_rate
    );

    Ok(AudioHandle {
        commands: CommandSender::new(tx),
        clock,
        _output_stream: stream,
    })
}

// ── Output stream ─────────────────────────────────────────────────

fn build_output_stream_f32(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    rx: Receiver<AudioCommand>,
    clock: AudioClock,
    config: &EngineConfig,
) -> EngineResult<cpal::Stream> {
    let channels = stream_config.channels as usize;
    let mut engine = Engine::new(clock.sample_rate(), config);
    let mut scratch: Vec<StereoFrame> = Vec::with_capacity(4096);

    let err_fn = |err| log::error!("audio output stream error: {}", err);

    let stream = device
        .build_output_stream(
            stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                while let Ok(cmd) = rx.try_recv() {
                    engine.handle_cmd(cmd);
                }

                let n_frames = data.len() / channels;
                if channels == 2 {
                    // SAFETY: StereoFrame is repr(C) with two f32 fields, so an
                    // interleaved stereo buffer has exactly its layout
                    let frames: &mut [StereoFrame] = unsafe {
                        std::slice::from_raw_parts_mut(data.as_mut_ptr() as *mut StereoFrame, n_frames)
                    };
                    engine.render_block(frames);
                } else {
                    scratch.resize(n_frames, StereoFrame::zero());
                    engine.render_block(&mut scratch);
                    for (out, frame) in data.chunks_mut(channels).zip(&scratch) {
                        out[0] = if channels == 1 { (frame.left + frame.right) * 0.5 } else { frame.left };
                        if channels > 1 {
                            out[1] = frame.right;
                        }
                        for ch in out.iter_mut().skip(2) {
                            *ch = 0.0;
                        }
                    }
                }

                clock.advance(n_frames as u64);
            },
            err_fn,
            None,
        )
        .map_err(|e| EngineError::Device(e.to_string()))?;

    Ok(stream)
}
