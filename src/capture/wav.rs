use std::io::Cursor;

use crate::error::{EngineError, EngineResult};

const HEADER_LEN: usize = 44;
const BITS_PER_SAMPLE: u16 = 16;

fn encode_error(e: hound::Error) -> EngineError {
    EngineError::Encode { format: "wav", reason: e.to_string() }
}

/// Clamp to [-1, 1] and scale asymmetrically so both -1.0 and 1.0 fit:
/// negatives by 32768, positives by 32767.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| {
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 { (s * 32_768.0).round() as i16 } else { (s * 32_767.0).round() as i16 }
        })
        .collect()
}

// 16-bit PCM; for mono and stereo hound writes the canonical 44-byte header
pub fn encode_wav(samples: &[f32], sample_rate: u32, channels: u16) -> EngineResult<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(HEADER_LEN + samples.len() * 2));
    let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(encode_error)?;
    for s in float_to_pcm16(samples) {
        writer.write_sample(s).map_err(encode_error)?;
    }
    writer.finalize().map_err(encode_error)?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::DecodedTrack;

    #[test]
    fn header_is_canonical() {
        let wav = encode_wav(&[0.0; 10], 44_100, 1).unwrap();
        assert_eq!(wav.len(), 44 + 20);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(wav[4..8].try_into().unwrap()), 36 + 20);
        assert_eq!(&wav[8..16], b"WAVEfmt ");
        assert_eq!(u32::from_le_bytes(wav[16..20].try_into().unwrap()), 16);
        assert_eq!(u16::from_le_bytes(wav[20..22].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(wav[22..24].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(wav[24..28].try_into().unwrap()), 44_100);
        assert_eq!(u32::from_le_bytes(wav[28..32].try_into().unwrap()), 88_200);
        assert_eq!(u16::from_le_bytes(wav[32..34].try_into().unwrap()), 2);
        assert_eq!(u16::from_le_bytes(wav[34..36].try_into().unwrap()), 16);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 20);
    }

    #[test]
    fn pcm_conversion_clamps_and_is_asymmetric() {
        assert_eq!(float_to_pcm16(&[1.0, -1.0, 2.5, -7.0, 0.0]), vec![32_767, -32_768, 32_767, -32_768, 0]);
    }

    #[test]
    fn round_trip_within_one_lsb() {
        let samples: Vec<f32> = (0..4_800)
            .map(|i| 0.9 * (i as f32 * 0.013).sin() + if i % 100 == 0 { 0.1 } else { 0.0 })
            .collect();
        let wav = encode_wav(&samples, 48_000, 1).unwrap();

        let reader = hound::WavReader::new(std::io::Cursor::new(&wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 48_000);
        assert_eq!(reader.len() as usize, samples.len());

        let track = DecodedTrack::from_wav_bytes(&wav).unwrap();
        assert_eq!(track.sample_rate(), 48_000);
        assert_eq!(track.len_frames(), samples.len());
        for (a, b) in samples.iter().zip(track.channel(0)) {
            assert!((a.clamp(-1.0, 1.0) - b).abs() <= 1.0 / 32_768.0, "{a} vs {b}");
        }
    }
}
