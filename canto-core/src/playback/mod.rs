//! Playback sinks and the public play entry points.
//!
//! ## Play path
//!
//! ```text
//! play_audio(bytes)        ──► decode ──┐
//! play_raw_audio(data, f)  ─────────────┼──► global SinkHandle ──► AudioSink::play
//! play_stream(clips)       ──► decode ──┤         (selected once per process:
//! play_raw_stream(chunks)  ─────────────┘          device → pipe → blocking-call)
//! ```
//!
//! Every entry point returns as soon as the buffer is enqueued; a dedicated
//! delivery thread inside the selected sink paces the actual output. Buffers
//! play in enqueue order and are never dropped once accepted.

#[cfg(feature = "audio-cpal")]
pub mod device;
pub mod fallback;
pub mod pipe;

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::capability::{self, Capabilities};
use crate::decode;
use crate::error::Result;
use crate::pcm::{PcmBuffer, PcmFormat};

/// Contract for playback backends.
///
/// Sinks are stateful — each lazily spawns its delivery thread and holds the
/// producer side of its queue — hence `&mut self` on `play`. All mutation is
/// serialised through `SinkHandle`'s `parking_lot::Mutex`.
pub trait AudioSink: Send + 'static {
    /// Short stable name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Enqueue one buffer and return without waiting for it to finish
    /// sounding. Buffers play in the order they were accepted.
    ///
    /// # Errors
    /// Returns an error when the buffer cannot be converted or handed to the
    /// backend. Buffers accepted before the failure still play.
    fn play(&mut self, buffer: PcmBuffer) -> Result<()>;
}

/// Thread-safe reference-counted handle to any `AudioSink` implementor.
///
/// The mutex does not poison: a producer that panics while holding it leaves
/// later `play` calls usable.
#[derive(Clone)]
pub struct SinkHandle(pub Arc<Mutex<dyn AudioSink>>);

impl SinkHandle {
    /// Wrap any `AudioSink` in a `SinkHandle`.
    pub fn new<S: AudioSink>(sink: S) -> Self {
        Self(Arc::new(Mutex::new(sink)))
    }

    /// Lock the sink and enqueue one buffer.
    pub fn play(&self, buffer: PcmBuffer) -> Result<()> {
        self.0.lock().play(buffer)
    }

    pub fn name(&self) -> &'static str {
        self.0.lock().name()
    }
}

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle").finish_non_exhaustive()
    }
}

/// Pick the best backend the probed capabilities allow.
///
/// Preference order: device output, then an external player fed over a pipe,
/// then the blocking one-shot fallback. The fallback cannot pace buffers, so
/// choosing it warns that streams may sound choppy.
fn select_sink(caps: &Capabilities) -> SinkHandle {
    #[cfg(feature = "audio-cpal")]
    if caps.output_device.is_available() {
        info!(sink = device::DeviceSink::NAME, "selected playback sink");
        return SinkHandle::new(device::DeviceSink::new());
    }

    if caps.player.is_available() {
        info!(sink = pipe::PipeProcessSink::NAME, "selected playback sink");
        return SinkHandle::new(pipe::PipeProcessSink::new());
    }

    warn!(
        sink = fallback::BlockingCallSink::NAME,
        "no output device or player process available — streamed audio may \
         sound choppy under this fallback"
    );
    SinkHandle::new(fallback::BlockingCallSink::new(Box::new(
        fallback::WavCommandPlayer::new(),
    )))
}

/// Process-wide sink, selected on the first play and never re-evaluated.
fn global_sink() -> &'static SinkHandle {
    static GLOBAL_SINK: OnceLock<SinkHandle> = OnceLock::new();
    GLOBAL_SINK.get_or_init(|| select_sink(capability::capabilities()))
}

// ── Public entry points ──────────────────────────────────────────────────────

/// Decode one WAV clip and enqueue it for playback.
///
/// Returns as soon as the decoded buffer is queued; playback itself happens
/// on the sink's delivery thread.
pub fn play_audio(bytes: &[u8]) -> Result<()> {
    let buffer = decode::decode(bytes)?;
    global_sink().play(buffer)
}

/// Enqueue raw PCM bytes in the given format, bypassing container decoding.
pub fn play_raw_audio(data: Vec<u8>, format: PcmFormat) -> Result<()> {
    let buffer = PcmBuffer::new(data, format)?;
    global_sink().play(buffer)
}

/// Enqueue every WAV clip pulled from `clips`, in order.
///
/// Pulls one item at a time with no buffering of its own: a slow producer
/// simply enqueues late, and the sink covers the gaps.
pub fn play_stream<I>(clips: I) -> Result<()>
where
    I: IntoIterator<Item = Vec<u8>>,
{
    for clip in clips {
        play_audio(&clip)?;
    }
    Ok(())
}

/// Enqueue every raw PCM chunk pulled from `chunks`, in order.
pub fn play_raw_stream<I>(chunks: I, format: PcmFormat) -> Result<()>
where
    I: IntoIterator<Item = Vec<u8>>,
{
    for chunk in chunks {
        play_raw_audio(chunk, format)?;
    }
    Ok(())
}
