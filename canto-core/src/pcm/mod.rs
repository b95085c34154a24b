//! PCM buffer and format value types shared by playback and capture.

pub mod convert;

use std::fmt;
use std::time::Duration;

use crate::error::{CantoError, Result};

/// Shape of raw PCM data: bytes per sample, channel count, frame rate.
///
/// Samples are signed little-endian integers of `sample_width` bytes,
/// interleaved by channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// Bytes per sample (1, 2, or 4).
    pub sample_width: u16,
    /// Interleaved channel count.
    pub channels: u16,
    /// Frames per second in Hz.
    pub frame_rate: u32,
}

impl PcmFormat {
    /// The fixed format the device and pipe sinks run at:
    /// 16-bit signed LE, mono, 24 000 Hz.
    pub const CANONICAL: PcmFormat = PcmFormat {
        sample_width: 2,
        channels: 1,
        frame_rate: 24_000,
    };

    pub fn new(sample_width: u16, channels: u16, frame_rate: u32) -> Self {
        Self {
            sample_width,
            channels,
            frame_rate,
        }
    }

    /// Bytes per frame (one sample per channel).
    pub fn frame_size(&self) -> usize {
        self.sample_width as usize * self.channels as usize
    }

    /// Bytes per second of audio in this format.
    pub fn byte_rate(&self) -> usize {
        self.frame_size() * self.frame_rate as usize
    }

    pub fn is_canonical(&self) -> bool {
        *self == Self::CANONICAL
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::CANONICAL
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-byte/{}ch/{}Hz",
            self.sample_width, self.channels, self.frame_rate
        )
    }
}

/// An immutable chunk of raw PCM audio plus its format.
///
/// Constructed once, then only read; merging two buffers produces a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBuffer {
    data: Vec<u8>,
    format: PcmFormat,
}

impl PcmBuffer {
    /// Wraps raw bytes in a validated buffer.
    ///
    /// Fails if the format has a zero field, the sample width is not 1, 2, or
    /// 4 bytes, or the byte length is not a whole number of frames.
    pub fn new(data: Vec<u8>, format: PcmFormat) -> Result<Self> {
        if format.channels == 0 || format.frame_rate == 0 {
            return Err(CantoError::InvalidPcm(format!(
                "format has a zero field: {format}"
            )));
        }
        if !matches!(format.sample_width, 1 | 2 | 4) {
            return Err(CantoError::InvalidPcm(format!(
                "unsupported sample width: {} bytes",
                format.sample_width
            )));
        }
        if data.len() % format.frame_size() != 0 {
            return Err(CantoError::InvalidPcm(format!(
                "{} bytes is not a whole number of {}-byte frames",
                data.len(),
                format.frame_size()
            )));
        }
        Ok(Self { data, format })
    }

    /// Encodes interleaved i16 samples as a 16-bit buffer.
    ///
    /// `channels` and `frame_rate` must be nonzero and `samples.len()` a
    /// multiple of `channels`; capture constructs its frames through here.
    pub fn from_i16_samples(samples: &[i16], channels: u16, frame_rate: u32) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self {
            data,
            format: PcmFormat::new(2, channels, frame_rate),
        }
    }

    /// Zero-valued audio of (approximately) `duration` in `format`.
    pub fn silence(format: PcmFormat, duration: Duration) -> Self {
        let frames = (duration.as_secs_f64() * f64::from(format.frame_rate)).round() as usize;
        Self {
            data: vec![0u8; frames * format.frame_size()],
            format,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Number of whole frames in the buffer.
    pub fn frames(&self) -> usize {
        self.data.len() / self.format.frame_size()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Playback time of this buffer at its own frame rate.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.format.frame_rate))
    }

    /// Concatenates two buffers of identical format into a new buffer.
    pub fn concat(&self, other: &PcmBuffer) -> Result<PcmBuffer> {
        if self.format != other.format {
            return Err(CantoError::FormatMismatch {
                left: self.format,
                right: other.format,
            });
        }
        let mut data = Vec::with_capacity(self.data.len() + other.data.len());
        data.extend_from_slice(&self.data);
        data.extend_from_slice(&other.data);
        Ok(PcmBuffer {
            data,
            format: self.format,
        })
    }
}
