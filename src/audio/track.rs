use std::io::Cursor;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::frame::StereoFrame;
use crate::error::{EngineError, EngineResult};

/// A fully decoded piece of audio. Never mutated after decode; shared between
/// the transport and the renderer behind an `Arc`.
#[derive(Clone, Debug)]
pub struct DecodedTrack {
    sample_rate: u32,
    channels: Vec<Vec<f32>>, // one vec per channel, all the same length
}

impl DecodedTrack {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> EngineResult<Self> {
        if sample_rate == 0 {
            return Err(EngineError::Decode("sample rate is zero".into()));
        }
        if channels.is_empty() {
            return Err(EngineError::Decode("no channels".into()));
        }
        let len = channels[0].len();
        if channels.iter().any(|c| c.len() != len) {
            return Err(EngineError::Decode("channels have different lengths".into()));
        }
        Ok(Self { sample_rate, channels })
    }

    pub fn from_mono(sample_rate: u32, samples: Vec<f32>) -> EngineResult<Self> {
        Self::new(sample_rate, vec![samples])
    }

    // Decode any container/codec symphonia knows (mp3 and wav at least).
    // `extension` is only a format hint.
    pub fn decode(bytes: Vec<u8>, extension: Option<&str>) -> EngineResult<Self> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| EngineError::Decode("no audio track found".into()))?;
        let track_id = track.id;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| EngineError::Decode(e.to_string()))?;

        let mut interleaved: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut num_channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(EngineError::Decode(e.to_string())),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    // a corrupt packet; the rest of the file may still be fine
                    log::warn!("skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(EngineError::Decode(e.to_string())),
            };

            if sample_buf.is_none() {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                num_channels = spec.channels.count();
                sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            }
            if let Some(buf) = sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buf.samples());
            }
        }

        if interleaved.is_empty() || num_channels == 0 {
            return Err(EngineError::Decode("file contains no audio frames".into()));
        }

        let track = Self::new(sample_rate, deinterleave(&interleaved, num_channels))?;
        log::info!(
            "decoded {:.2}s of audio ({} ch @ {} Hz)",
            track.duration_secs(),
            track.channel_count(),
            track.sample_rate()
        );
        Ok(track)
    }

    pub fn decode_file(path: &Path) -> EngineResult<Self> {
        let bytes = std::fs::read(path)?;
        let ext = path.extension().and_then(|e| e.to_str());
        Self::decode(bytes, ext)
    }

    // Decode a RIFF/WAVE byte blob. Integer samples map back to [-1, 1] with
    // the same asymmetric scale the take encoder uses.
    pub fn from_wav_bytes(bytes: &[u8]) -> EngineResult<Self> {
        let mut reader =
            hound::WavReader::new(Cursor::new(bytes)).map_err(|e| EngineError::Decode(e.to_string()))?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| EngineError::Decode(e.to_string()))?,
            hound::SampleFormat::Int => {
                let neg = (1i64 << (spec.bits_per_sample - 1)) as f32;
                let pos = neg - 1.0;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|x| if x < 0 { x as f32 / neg } else { x as f32 / pos }))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| EngineError::Decode(e.to_string()))?
            }
        };

        Self::new(spec.sample_rate, deinterleave(&samples, spec.channels.max(1) as usize))
    }

    /// The same audio starting `secs` later, with silence in front.
    pub fn delayed(mut self, secs: f64) -> Self {
        let pad = (secs.max(0.0) * self.sample_rate as f64).round() as usize;
        if pad > 0 {
            for channel in self.channels.iter_mut() {
                channel.splice(0..0, std::iter::repeat_n(0.0, pad));
            }
        }
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn len_frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn duration_secs(&self) -> f64 {
        self.len_frames() as f64 / self.sample_rate as f64
    }

    // mono tracks are duplicated to both sides, anything wider uses the first two channels
    #[inline]
    pub fn frame(&self, index: usize) -> StereoFrame {
        let left = self.channels[0][index];
        let right = self.channels.get(1).map_or(left, |c| c[index]);
        StereoFrame { left, right }
    }

    /// Average of all channels, sample by sample.
    pub fn mono_mix(&self) -> Vec<f32> {
        if self.channels.len() == 1 {
            return self.channels[0].clone();
        }
        let inv = 1.0 / self.channels.len() as f32;
        let mut mono = vec![0.0f32; self.len_frames()];
        for channel in &self.channels {
            for (m, s) in mono.iter_mut().zip(channel) {
                *m += s * inv;
            }
        }
        mono
    }
}

fn deinterleave(interleaved: &[f32], channels: usize) -> Vec<Vec<f32>> {
    if channels == 1 {
        return vec![interleaved.to_vec()];
    }
    let frames = interleaved.len() / channels;
    let mut out = vec![Vec::with_capacity(frames); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (ch, s) in frame.iter().enumerate() {
            out[ch].push(*s);
        }
    }
    out
}

pub fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    // plain linear interpolation; good enough for analysis input
    if source_rate == target_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = target_rate as f64 / source_rate as f64;
    let out_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 / ratio; // ex. 3.7
        let idx = src_pos.floor() as usize; // ex. 3
        let frac = (src_pos - idx as f64) as f32; // ex. 0.7
        if idx >= samples.len() - 1 {
            out.push(samples[samples.len() - 1]);
        } else {
            out.push(samples[idx] * (1.0 - frac) + samples[idx + 1] * frac);
        }
    }
    out
}
