use thiserror::Error;

use crate::pcm::PcmFormat;

/// All errors produced by canto-core.
#[derive(Debug, Error)]
pub enum CantoError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("{capability} is unavailable: {reason}")]
    MissingDependency {
        capability: &'static str,
        reason: String,
    },

    #[error("cannot concatenate PCM buffers of differing formats: {left} vs {right}")]
    FormatMismatch { left: PcmFormat, right: PcmFormat },

    #[error("invalid PCM data: {0}")]
    InvalidPcm(String),

    #[error("audio decode error: {0}")]
    Decode(String),

    #[error("player error: {0}")]
    Player(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CantoError>;
