//! WAV decoding — the container collaborator behind `play_audio`.
//!
//! Every source sample format (8/16/24/32-bit int, 32-bit float) is
//! normalized to 16-bit signed LE at the container's native channel count and
//! rate; the selected sink converts onward from there.

use std::io::Cursor;

use crate::error::{CantoError, Result};
use crate::pcm::PcmBuffer;

/// Decodes a WAV container into a 16-bit [`PcmBuffer`].
pub fn decode(bytes: &[u8]) -> Result<PcmBuffer> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| CantoError::Decode(format!("not a readable WAV stream: {e}")))?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(CantoError::Decode(format!(
            "degenerate WAV header: {} channels at {} Hz",
            spec.channels, spec.sample_rate
        )));
    }

    let samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CantoError::Decode(e.to_string()))?,
        hound::SampleFormat::Int if spec.bits_per_sample < 16 => {
            let shift = 16 - spec.bits_per_sample;
            reader
                .samples::<i16>()
                .map(|s| s.map(|v| v << shift))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| CantoError::Decode(e.to_string()))?
        }
        hound::SampleFormat::Int if spec.bits_per_sample == 16 => reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CantoError::Decode(e.to_string()))?,
        hound::SampleFormat::Int => {
            let shift = spec.bits_per_sample - 16;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| CantoError::Decode(e.to_string()))?
        }
    };

    Ok(PcmBuffer::from_i16_samples(
        &samples,
        spec.channels,
        spec.sample_rate,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(spec: hound::WavSpec, write: impl FnOnce(&mut hound::WavWriter<&mut Cursor<Vec<u8>>>)) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            write(&mut writer);
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_16bit_mono() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 24_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, |w| {
            for s in [1000i16, -1000, 32_767] {
                w.write_sample(s).unwrap();
            }
        });

        let buffer = decode(&bytes).unwrap();
        assert_eq!(buffer.format().channels, 1);
        assert_eq!(buffer.format().frame_rate, 24_000);
        assert_eq!(buffer.data(), PcmBuffer::from_i16_samples(&[1000, -1000, 32_767], 1, 24_000).data());
    }

    #[test]
    fn decodes_float_stereo_to_i16() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let bytes = wav_bytes(spec, |w| {
            for s in [0.5f32, -0.5] {
                w.write_sample(s).unwrap();
            }
        });

        let buffer = decode(&bytes).unwrap();
        assert_eq!(buffer.format().channels, 2);
        assert_eq!(buffer.format().frame_rate, 44_100);
        assert_eq!(
            buffer.data(),
            PcmBuffer::from_i16_samples(&[16_384, -16_384], 2, 44_100).data()
        );
    }

    #[test]
    fn scales_8bit_up_to_16bit() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 8,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, |w| {
            w.write_sample(64i16).unwrap();
        });

        let buffer = decode(&bytes).unwrap();
        assert_eq!(
            buffer.data(),
            PcmBuffer::from_i16_samples(&[64 << 8], 1, 8_000).data()
        );
    }

    #[test]
    fn scales_24bit_down_to_16bit() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 24,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, |w| {
            for s in [1i32 << 22, -(1i32 << 22)] {
                w.write_sample(s).unwrap();
            }
        });

        let buffer = decode(&bytes).unwrap();
        assert_eq!(
            buffer.data(),
            PcmBuffer::from_i16_samples(&[1 << 14, -(1 << 14)], 1, 48_000).data()
        );
    }

    #[test]
    fn rejects_non_wav_bytes() {
        let err = decode(b"definitely not audio").unwrap_err();
        assert!(matches!(err, CantoError::Decode(_)));
    }
}
