//! # PCM Conversion and Decoding
//!
//! Sample-format helpers for both directions of the voice stream.
//!
//! ## Capture side:
//! - **float_to_s16**: normalized `f32` samples to signed 16-bit PCM
//! - **s16_to_le_bytes**: PCM to the little-endian byte layout sent on the wire
//! - **audio_level**: 0–100 meter value for one block
//!
//! ## Playback side:
//! - **decode_audio**: frame payload (WAV container or raw s16le) to mono `f32`

use crate::error::ProtocolDecodeError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Convert normalized float samples to signed 16-bit PCM.
///
/// Samples are clamped to [-1, 1] first. Positive values scale by 32767 and
/// negative values by 32768, so both ends of the i16 range are reachable.
pub fn float_to_s16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let clamped = sample.clamp(-1.0, 1.0);
            if clamped < 0.0 {
                (clamped * 32768.0) as i16
            } else {
                (clamped * 32767.0) as i16
            }
        })
        .collect()
}

/// Serialize samples as little-endian bytes.
pub fn s16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // Writing into a Vec cannot fail.
        let _ = bytes.write_i16::<LittleEndian>(sample);
    }
    bytes
}

/// Scale 16-bit PCM back to [-1.0, 1.0).
pub fn s16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// Mean absolute amplitude scaled onto a 0–100 meter.
pub fn audio_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s.abs()).sum();
    let average = sum / samples.len() as f32;
    (average * 20000.0).min(100.0)
}

/// Mono audio ready for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Linear-interpolation resampling, good enough for speech playback.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

fn downmix(interleaved: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved;
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Decode a frame payload into mono samples.
///
/// ## Accepted payloads:
/// - a RIFF/WAV container (its own header wins over the declared format)
/// - raw s16le PCM at `declared_rate` with `declared_channels` interleaved
pub fn decode_audio(
    bytes: &[u8],
    declared_rate: u32,
    declared_channels: u32,
) -> Result<DecodedAudio, ProtocolDecodeError> {
    if bytes.is_empty() {
        return Err(ProtocolDecodeError::Audio("empty audio payload".into()));
    }

    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        return decode_wav(bytes);
    }

    if declared_rate == 0 {
        return Err(ProtocolDecodeError::Audio("raw audio without a sample rate".into()));
    }
    if bytes.len() % 2 != 0 {
        return Err(ProtocolDecodeError::Audio(
            "raw audio length must be even for 16-bit samples".into(),
        ));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }

    let channels = declared_channels.max(1) as usize;
    Ok(DecodedAudio {
        samples: downmix(s16_to_float(&samples), channels),
        sample_rate: declared_rate,
    })
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, ProtocolDecodeError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| ProtocolDecodeError::Audio(format!("invalid wav: {e}")))?;
    let spec = reader.spec();
    let wav_error = |e: hound::Error| ProtocolDecodeError::Audio(format!("invalid wav data: {e}"));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(wav_error)?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(wav_error)?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(interleaved, usize::from(spec.channels)),
        sample_rate: spec.sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_float_to_s16_endpoints() {
        assert_eq!(float_to_s16(&[1.0, -1.0, 0.0]), vec![32767, -32768, 0]);
        assert_eq!(float_to_s16(&[2.5, -7.0]), vec![32767, -32768]);
        assert_eq!(float_to_s16(&[0.5, -0.5]), vec![16383, -16384]);
    }

    #[test]
    fn test_le_bytes_layout() {
        assert_eq!(s16_to_le_bytes(&[1, -1, 0x1234]), vec![0x01, 0x00, 0xff, 0xff, 0x34, 0x12]);
    }

    #[test]
    fn test_audio_level_scale() {
        assert_eq!(audio_level(&[]), 0.0);
        assert_eq!(audio_level(&[0.0; 512]), 0.0);
        assert!((audio_level(&[0.001, -0.001]) - 20.0).abs() < 1e-3);
        assert_eq!(audio_level(&[0.5; 16]), 100.0);
    }

    #[test]
    fn test_raw_pcm_decodes_and_downmixes() {
        let bytes = s16_to_le_bytes(&[16384, -16384, 8192, 8192]);
        let mono = decode_audio(&bytes, 16000, 1).unwrap();
        assert_eq!(mono.samples, vec![0.5, -0.5, 0.25, 0.25]);
        assert_eq!(mono.sample_rate, 16000);

        let stereo = decode_audio(&bytes, 16000, 2).unwrap();
        assert_eq!(stereo.samples, vec![0.0, 0.25]);
        assert!((stereo.duration_secs() - 2.0 / 16000.0).abs() < 1e-12);
    }

    #[test]
    fn test_wav_container_decodes() {
        let bytes = wav_bytes(&[0, 16384, -16384, 32767], 24000, 1);
        let decoded = decode_audio(&bytes, 16000, 1).unwrap();
        assert_eq!(decoded.sample_rate, 24000);
        assert_eq!(decoded.samples.len(), 4);
        assert_eq!(decoded.samples[1], 0.5);
        assert!((decoded.duration_secs() - 4.0 / 24000.0).abs() < 1e-12);
    }

    #[test]
    fn test_resample_linear_lengths() {
        let samples = vec![0.0, 1.0, 0.0, -1.0];
        assert_eq!(resample_linear(&samples, 16000, 16000), samples);
        let up = resample_linear(&samples, 8000, 16000);
        assert_eq!(up.len(), 8);
        assert_eq!(up[1], 0.5);
        assert_eq!(resample_linear(&samples, 16000, 8000).len(), 2);
    }

    #[test]
    fn test_undecodable_payloads() {
        assert!(decode_audio(&[], 16000, 1).is_err());
        assert!(decode_audio(&[1, 2, 3], 16000, 1).is_err());
        assert!(decode_audio(&[1, 2], 0, 1).is_err());
        let mut broken = b"RIFF\x00\x00\x00\x00WAVE".to_vec();
        broken.extend_from_slice(&[0; 4]);
        assert!(decode_audio(&broken, 16000, 1).is_err());
    }
}
