//! Canonical-format conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! Producers hand the sinks whatever PCM they have: TTS engines commonly emit
//! 22.05 or 44.1 kHz, decoded files are often stereo. The device and pipe
//! sinks run at one fixed format (16-bit signed LE, mono, 24 kHz), so
//! `to_canonical` bridges the gap on the producer's thread before the buffer
//! is queued.
//!
//! Already-canonical buffers pass through as a plain clone — no rubato
//! session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{CantoError, Result};
use crate::pcm::{PcmBuffer, PcmFormat};

/// Input frame count per rubato call.
const RESAMPLE_CHUNK: usize = 1024;

/// Converts a buffer to [`PcmFormat::CANONICAL`].
pub fn to_canonical(buffer: &PcmBuffer) -> Result<PcmBuffer> {
    if buffer.format().is_canonical() {
        return Ok(buffer.clone());
    }

    let mono = decode_to_mono_f32(buffer)?;
    let resampled = resample(
        &mono,
        buffer.format().frame_rate,
        PcmFormat::CANONICAL.frame_rate,
    )?;
    let samples: Vec<i16> = resampled.iter().map(|&s| encode_i16(s)).collect();
    Ok(PcmBuffer::from_i16_samples(
        &samples,
        1,
        PcmFormat::CANONICAL.frame_rate,
    ))
}

/// Decodes the buffer's integer samples to f32 in [-1.0, 1.0] and
/// mean-downmixes interleaved channels to mono.
fn decode_to_mono_f32(buffer: &PcmBuffer) -> Result<Vec<f32>> {
    let format = buffer.format();
    let data = buffer.data();

    let mut samples = Vec::with_capacity(data.len() / format.sample_width as usize);
    match format.sample_width {
        1 => samples.extend(data.iter().map(|&b| f32::from(b as i8) / f32::from(i8::MAX))),
        2 => samples.extend(
            data.chunks_exact(2)
                .map(|c| f32::from(i16::from_le_bytes([c[0], c[1]])) / f32::from(i16::MAX)),
        ),
        4 => samples.extend(
            data.chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / i32::MAX as f32),
        ),
        other => {
            return Err(CantoError::InvalidPcm(format!(
                "unsupported sample width: {other} bytes"
            )))
        }
    }

    let channels = format.channels as usize;
    if channels == 1 {
        return Ok(samples);
    }
    let mut mono = Vec::with_capacity(samples.len() / channels);
    for frame in samples.chunks_exact(channels) {
        mono.push(frame.iter().sum::<f32>() / channels as f32);
    }
    Ok(mono)
}

fn encode_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
}

/// Resamples a whole mono buffer from `from_rate` to `to_rate`.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0, // fixed ratio — no dynamic adjustment
        PolynomialDegree::Cubic,
        RESAMPLE_CHUNK,
        1, // mono
    )
    .map_err(|e| CantoError::AudioStream(format!("resampler init: {e}")))?;

    let max_out = resampler.output_frames_max();
    let mut output_buf = vec![vec![0f32; max_out]; 1];
    let ideal_len = (samples.len() as f64 * ratio).round() as usize;
    let mut out = Vec::with_capacity(ideal_len + max_out);

    let mut consumed = 0;
    while samples.len() - consumed >= RESAMPLE_CHUNK {
        let input_slice = &samples[consumed..consumed + RESAMPLE_CHUNK];
        let (_, produced) = resampler
            .process_into_buffer(&[input_slice], &mut output_buf, None)
            .map_err(|e| CantoError::AudioStream(format!("resampler process: {e}")))?;
        out.extend_from_slice(&output_buf[0][..produced]);
        consumed += RESAMPLE_CHUNK;
    }

    let tail = &samples[consumed..];
    if !tail.is_empty() {
        let (_, produced) = resampler
            .process_partial_into_buffer(Some(&[tail]), &mut output_buf, None)
            .map_err(|e| CantoError::AudioStream(format!("resampler flush: {e}")))?;
        out.extend_from_slice(&output_buf[0][..produced]);
    }

    // rubato pads the final partial block with zeros; trim back to the ideal
    // length so duration math stays exact.
    out.truncate(ideal_len);
    Ok(out)
}
