use mp3lame_encoder::{Bitrate, Builder, FlushNoGap, MonoPcm, Quality};

use super::wav::float_to_pcm16;
use crate::error::{EngineError, EngineResult};

const SAMPLES_PER_FRAME: usize = 1152;
const FLUSH_RESERVE: usize = 7200; // LAME's worst case for a final flush

fn encode_error(reason: impl std::fmt::Debug) -> EngineError {
    EngineError::Encode { format: "mp3", reason: format!("{:?}", reason) }
}

/// Scales so the loudest sample sits at `target_peak`. Silence is untouched.
pub fn normalize(samples: &[f32], target_peak: f32) -> Vec<f32> {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak == 0.0 {
        return samples.to_vec();
    }
    let gain = target_peak / peak;
    samples.iter().map(|s| s * gain).collect()
}

// mono, 192 kbps
pub fn encode_mp3(samples: &[f32], sample_rate: u32, target_peak: f32) -> EngineResult<Vec<u8>> {
    let pcm = float_to_pcm16(&normalize(samples, target_peak));

    let mut builder = Builder::new().ok_or_else(|| encode_error("could not create LAME builder"))?;
    builder.set_num_channels(1).map_err(encode_error)?;
    builder.set_sample_rate(sample_rate).map_err(encode_error)?;
    builder.set_brate(Bitrate::Kbps192).map_err(encode_error)?;
    builder.set_quality(Quality::Best).map_err(encode_error)?;
    let mut encoder = builder.build().map_err(encode_error)?;

    let mut out: Vec<u8> = Vec::new();
    for frame in pcm.chunks(SAMPLES_PER_FRAME) {
        out.reserve(mp3lame_encoder::max_required_buffer_size(frame.len()));
        let written = encoder.encode(MonoPcm(frame), out.spare_capacity_mut()).map_err(encode_error)?;
        // SAFETY: the encoder initialised `written` bytes of spare capacity
        unsafe { out.set_len(out.len() + written) };
    }

    out.reserve(FLUSH_RESERVE);
    let written = encoder.flush::<FlushNoGap>(out.spare_capacity_mut()).map_err(encode_error)?;
    // SAFETY: as above
    unsafe { out.set_len(out.len() + written) };

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_hits_target_peak() {
        let out = normalize(&[0.1, -0.5, 0.25], 0.95);
        assert!((out[1] + 0.95).abs() < 1e-6);
        assert!((out[0] - 0.19).abs() < 1e-6);
        assert_eq!(normalize(&[0.0, 0.0], 0.95), vec![0.0, 0.0]);
    }

    #[test]
    fn output_starts_with_frame_sync() {
        let samples: Vec<f32> = (0..44_100)
            .map(|i| 0.3 * (std::f32::consts::TAU * 440.0 * i as f32 / 44_100.0).sin())
            .collect();
        let mp3 = encode_mp3(&samples, 44_100, 0.95).unwrap();
        assert!(mp3.len() > 1_000);
        assert_eq!(mp3[0], 0xFF);
        assert_eq!(mp3[1] & 0xE0, 0xE0);
    }
}
