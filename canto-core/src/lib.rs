//! # canto-core
//!
//! Low-latency audio streaming SDK: schedule PCM playback, capture
//! microphone frames.
//!
//! ## Architecture
//!
//! ```text
//! play_audio / play_raw_audio ──► SinkHandle (process-wide, lazy)
//!                                      │
//!                   ┌──────────────────┼──────────────────┐
//!               DeviceSink       PipeProcessSink    BlockingCallSink
//!              (cpal output)    (player stdin pipe) (temp wav per call)
//!
//! microphone ──► cpal callback ──► SPSC ring ──► capture thread
//!                                                     │
//!                                   CaptureStream / AsyncCaptureStream
//! ```
//!
//! Playback never blocks the caller: every sink hands buffers to its own
//! delivery thread, which paces writes against a running playback deadline
//! and pads a starved pipe with silence so the player process stays warm.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod capability;
pub mod capture;
pub mod decode;
pub mod error;
pub mod pcm;
pub mod playback;
pub mod ring;

// Convenience re-exports for downstream crates
pub use capability::{capabilities, Availability, Capabilities};
pub use capture::device::{list_input_devices, DeviceInfo};
pub use capture::{
    capture_stream, capture_stream_async, AsyncCaptureStream, CaptureConfig, CaptureStream,
};
pub use decode::decode;
pub use error::{CantoError, Result};
pub use pcm::{PcmBuffer, PcmFormat};
pub use playback::{play_audio, play_raw_audio, play_raw_stream, play_stream};
