use std::any::Any;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::error::{EngineError, EngineResult};

/// Receives mono microphone audio on the input callback thread.
pub trait InputSink: Send {
    /// Called once with the device rate before the first `process`.
    fn prepare(&mut self, _sample_rate: u32) {}
    fn process(&mut self, samples: &[f32]);
}

// An open microphone. Dropping it closes the device stream.
pub struct InputStream {
    pub sample_rate: u32,
    _guard: Box<dyn Any>,
}

impl InputStream {
    pub fn new(sample_rate: u32, guard: Box<dyn Any>) -> Self {
        Self { sample_rate, _guard: guard }
    }
}

// Opening twice gives two independent streams, each feeding its own sink.
pub trait Microphone {
    fn open(&self, sink: Box<dyn InputSink>) -> EngineResult<InputStream>;
}

/// The default system input device.
#[derive(Default)]
pub struct CpalMicrophone;

impl Microphone for CpalMicrophone {
    fn open(&self, mut sink: Box<dyn InputSink>) -> EngineResult<InputStream> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| EngineError::MicrophoneUnavailable("no default input device".into()))?;

        let supported = device
            .default_input_config()
            .map_err(|e| EngineError::MicrophoneUnavailable(e.to_string()))?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(EngineError::MicrophoneUnavailable(format!(
                "unsupported input sample format {:?}",
                supported.sample_format()
            )));
        }

        let stream_config: cpal::StreamConfig = supported.into();
        let sample_rate = stream_config.sample_rate.0;
        let in_channels = stream_config.channels as usize;
        sink.prepare(sample_rate);

        let mut mono: Vec<f32> = Vec::with_capacity(4096);
        let err_fn = |err| log::error!("audio input stream error: {}", err);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    if in_channels == 1 {
                        sink.process(data);
                        return;
                    }
                    // downmix, the analysis and the takes are mono
                    mono.clear();
                    let inv = 1.0 / in_channels as f32;
                    mono.extend(data.chunks_exact(in_channels).map(|c| c.iter().sum::<f32>() * inv));
                    sink.process(&mono);
                },
                err_fn,
                None,
            )
            .map_err(|e| EngineError::MicrophoneUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| EngineError::MicrophoneUnavailable(e.to_string()))?;

        log::info!("microphone open ({} ch @ {} Hz)", in_channels, sample_rate);
        Ok(InputStream::new(sample_rate, Box::new(stream)))
    }
}
