//! Microphone capture, exposed as blocking and async frame streams.
//!
//! ## Capture path
//!
//! ```text
//! cpal input callback ──► i16 SPSC ring ──► capture thread ──► republish
//!   (audio thread,          (2^18 slots)      (poll, wrap        ├─ sync:  unbounded crossbeam queue → CaptureStream
//!    converts to i16)                          PcmBuffer)        └─ async: bounded tokio queue → AsyncCaptureStream
//! ```
//!
//! One OS thread per open stream. The thread owns the `cpal::Stream` (it is
//! not `Send`) and exits when its consumer disconnects, which releases the
//! device. Open failures surface synchronously at the `capture_stream` call
//! site through a one-shot channel.

pub mod device;

use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::Result;
use crate::pcm::PcmBuffer;
use crate::ring::{CaptureConsumer, Consumer, Observer};

#[cfg(feature = "audio-cpal")]
use crate::error::CantoError;

/// How a capture stream is opened.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Input device index as reported by `list_input_devices`;
    /// `None` uses the system default.
    pub device_index: Option<usize>,
    /// Channel count to open the stream with. Default: 1.
    pub channels: u16,
    /// Sample rate in Hz. Default: 24000.
    pub frame_rate: u32,
    /// Device-level buffer size in frames. Default: 1200 (50 ms at 24 kHz).
    pub frames_per_buffer: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: None,
            channels: 1,
            frame_rate: 24_000,
            frames_per_buffer: 1_200,
        }
    }
}

/// Sleep between polls when the ring is empty (avoids busy-wait burning a core).
const DEFAULT_POLL_MS: u64 = 50;

fn poll_sleep() -> Duration {
    static POLL_MS: OnceLock<u64> = OnceLock::new();
    Duration::from_millis(*POLL_MS.get_or_init(|| {
        std::env::var("CANTO_CAPTURE_POLL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 200))
            .unwrap_or(DEFAULT_POLL_MS)
    }))
}

/// Queue depth between the capture thread and an async consumer. A slow
/// consumer stalls the capture thread at this bound instead of growing
/// memory; stalled capture overflows the ring, which drops with a warning.
const ASYNC_QUEUE_DEPTH: usize = 32;

/// Blocking frame sequence from one microphone.
///
/// Each pull blocks until a frame is available; the sequence never ends on
/// its own. Dropping the stream disconnects the queue, which stops the
/// capture thread and releases the device.
pub struct CaptureStream {
    rx: crossbeam_channel::Receiver<PcmBuffer>,
}

impl Iterator for CaptureStream {
    type Item = PcmBuffer;

    /// `None` only if the capture thread has died.
    fn next(&mut self) -> Option<PcmBuffer> {
        self.rx.recv().ok()
    }
}

/// Suspension-based frame sequence from one microphone.
///
/// Dropping the stream makes the capture thread's next submission fail,
/// which it treats as a clean shutdown signal.
pub struct AsyncCaptureStream {
    rx: tokio::sync::mpsc::Receiver<PcmBuffer>,
}

impl AsyncCaptureStream {
    /// Next frame, suspending the calling task until one is captured.
    ///
    /// `None` only if the capture thread has died.
    pub async fn next(&mut self) -> Option<PcmBuffer> {
        self.rx.recv().await
    }
}

/// Open a microphone and return its blocking frame stream.
///
/// Blocks until the device is confirmed open (or fails), then returns; the
/// capture thread keeps running in the background.
#[cfg(feature = "audio-cpal")]
pub fn capture_stream(config: CaptureConfig) -> Result<CaptureStream> {
    let (tx, rx) = crossbeam_channel::unbounded();
    spawn_capture_thread(config, move |frame| tx.send(frame).is_ok())?;
    Ok(CaptureStream { rx })
}

/// Open a microphone and return its suspension-based frame stream.
///
/// The stream must be consumed from an async runtime; opening it does not
/// require one.
#[cfg(feature = "audio-cpal")]
pub fn capture_stream_async(config: CaptureConfig) -> Result<AsyncCaptureStream> {
    let (tx, rx) = tokio::sync::mpsc::channel(ASYNC_QUEUE_DEPTH);
    // blocking_send stalls the capture thread while the queue is full and
    // fails only once the receiver is gone — the shutdown signal.
    spawn_capture_thread(config, move |frame| tx.blocking_send(frame).is_ok())?;
    Ok(AsyncCaptureStream { rx })
}

#[cfg(not(feature = "audio-cpal"))]
pub fn capture_stream(_config: CaptureConfig) -> Result<CaptureStream> {
    Err(missing_capture_backend())
}

#[cfg(not(feature = "audio-cpal"))]
pub fn capture_stream_async(_config: CaptureConfig) -> Result<AsyncCaptureStream> {
    Err(missing_capture_backend())
}

#[cfg(not(feature = "audio-cpal"))]
fn missing_capture_backend() -> crate::error::CantoError {
    crate::error::CantoError::MissingDependency {
        capability: "microphone capture",
        reason: "canto was compiled without the audio-cpal feature".into(),
    }
}

/// Spawn the capture thread and block until the device open is confirmed.
#[cfg(feature = "audio-cpal")]
fn spawn_capture_thread(
    config: CaptureConfig,
    republish: impl FnMut(PcmBuffer) -> bool + Send + 'static,
) -> Result<()> {
    let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();
    let poll = poll_sleep();

    thread::Builder::new()
        .name("canto-capture".into())
        .spawn(move || {
            let (producer, consumer) = crate::ring::create_capture_ring();
            // The stream must be built on this thread (it is not Send) and
            // stays alive until the loop returns.
            let _stream = match open_input_stream(&config, producer) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    return;
                }
            };
            let _ = open_tx.send(Ok(()));
            run_capture_loop(consumer, config.channels, config.frame_rate, poll, republish);
        })?;

    match open_rx.recv() {
        Ok(result) => result,
        Err(_) => Err(CantoError::AudioStream(
            "capture thread died during startup".into(),
        )),
    }
}

/// Shared poll loop: drain the ring into frames until the consumer is gone.
///
/// Pops everything available on each pass, truncated to whole device frames
/// so interleaved channels never split across two buffers.
fn run_capture_loop(
    mut consumer: CaptureConsumer,
    channels: u16,
    frame_rate: u32,
    poll: Duration,
    mut republish: impl FnMut(PcmBuffer) -> bool,
) {
    let mut samples: Vec<i16> = Vec::new();
    loop {
        let available = consumer.occupied_len() / channels as usize * channels as usize;
        if available == 0 {
            thread::sleep(poll);
            continue;
        }

        samples.resize(available, 0);
        consumer.pop_slice(&mut samples);

        let frame = PcmBuffer::from_i16_samples(&samples, channels, frame_rate);
        if !republish(frame) {
            debug!("capture consumer disconnected — stopping capture");
            return;
        }
    }
}

/// Open the input device pinned by `config` and start pushing i16 samples
/// into the ring. Overflow drops the excess with a warning.
#[cfg(feature = "audio-cpal")]
fn open_input_stream(
    config: &CaptureConfig,
    mut producer: crate::ring::CaptureProducer,
) -> Result<cpal::Stream> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, SampleRate, StreamConfig};
    use tracing::{error, info};

    let host = cpal::default_host();
    let device = match config.device_index {
        Some(index) => host
            .input_devices()
            .map_err(|e| CantoError::AudioDevice(e.to_string()))?
            .nth(index)
            .ok_or_else(|| CantoError::AudioDevice(format!("no input device at index {index}")))?,
        None => host
            .default_input_device()
            .ok_or(CantoError::NoDefaultInputDevice)?,
    };

    let device_name = device.name().unwrap_or_else(|_| "<unnamed>".into());
    info!(
        device = %device_name,
        channels = config.channels,
        frame_rate = config.frame_rate,
        "opening input device"
    );

    let supported = device
        .default_input_config()
        .map_err(|e| CantoError::AudioDevice(e.to_string()))?;

    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: SampleRate(config.frame_rate),
        buffer_size: cpal::BufferSize::Fixed(config.frames_per_buffer),
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => {
            let mut scratch: Vec<i16> = Vec::new();
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _info| {
                    scratch.clear();
                    scratch.extend(
                        data.iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * 32_767.0).round() as i16),
                    );
                    push_to_ring(&mut producer, &scratch);
                },
                |err| error!(error = %err, "input stream error"),
                None,
            )
        }

        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _info| push_to_ring(&mut producer, data),
            |err| error!(error = %err, "input stream error"),
            None,
        ),

        SampleFormat::U8 => {
            let mut scratch: Vec<i16> = Vec::new();
            device.build_input_stream(
                &stream_config,
                move |data: &[u8], _info| {
                    scratch.clear();
                    scratch.extend(data.iter().map(|&s| (i16::from(s) - 128) << 8));
                    push_to_ring(&mut producer, &scratch);
                },
                |err| error!(error = %err, "input stream error"),
                None,
            )
        }

        fmt => {
            return Err(CantoError::AudioStream(format!(
                "unsupported sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| CantoError::AudioStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CantoError::AudioStream(e.to_string()))?;
    Ok(stream)
}

/// Callback-side ring write: losing samples beats blocking the audio thread.
#[cfg(feature = "audio-cpal")]
fn push_to_ring(producer: &mut crate::ring::CaptureProducer, samples: &[i16]) {
    use crate::ring::Producer;

    let written = producer.push_slice(samples);
    if written < samples.len() {
        tracing::warn!(
            "capture ring full: dropped {} samples",
            samples.len() - written
        );
    }
}

#[cfg(test)]
mod tests {
    // Opening a real input stream needs a microphone and cannot run in CI;
    // these tests feed the ring directly, standing in for the device.

    use super::*;

    use crate::pcm::PcmFormat;
    use crate::ring::{create_capture_ring, Producer};

    const FAST_POLL: Duration = Duration::from_millis(1);

    fn sync_stream(consumer: CaptureConsumer, channels: u16) -> (CaptureStream, thread::JoinHandle<()>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = thread::spawn(move || {
            run_capture_loop(consumer, channels, 24_000, FAST_POLL, move |frame| {
                tx.send(frame).is_ok()
            })
        });
        (CaptureStream { rx }, handle)
    }

    #[test]
    fn sync_stream_yields_frames_in_capture_order() {
        let (mut producer, consumer) = create_capture_ring();
        let (mut stream, handle) = sync_stream(consumer, 1);

        // Pull each frame before producing the next, so waves never coalesce.
        let waves: [&[i16]; 3] = [&[1, 2, 3], &[4, 5], &[6]];
        for wave in waves {
            producer.push_slice(wave);
            let frame = stream.next().unwrap();
            assert_eq!(frame.format(), PcmFormat::CANONICAL);
            assert_eq!(
                frame.data(),
                PcmBuffer::from_i16_samples(wave, 1, 24_000).data()
            );
        }

        drop(stream);
        producer.push_slice(&[7]);
        handle.join().unwrap();
    }

    #[test]
    fn slow_consumer_loses_and_reorders_nothing() {
        let (mut producer, consumer) = create_capture_ring();
        let (stream, handle) = sync_stream(consumer, 1);

        // Produce three waves without reading anything back.
        for wave in [[10i16, 11], [12, 13], [14, 15]] {
            producer.push_slice(&wave);
            thread::sleep(Duration::from_millis(10));
        }

        let mut collected = Vec::new();
        while collected.len() < 6 {
            let frame = stream.rx.recv().unwrap();
            collected.extend_from_slice(&frame_samples(&frame));
        }
        assert_eq!(collected, vec![10, 11, 12, 13, 14, 15]);

        drop(stream);
        producer.push_slice(&[0]);
        handle.join().unwrap();
    }

    #[test]
    fn interleaved_channels_never_split_across_frames() {
        let (mut producer, consumer) = create_capture_ring();
        let (mut stream, handle) = sync_stream(consumer, 2);

        // Five samples at two channels: the dangling fifth stays in the
        // ring until its right-channel partner arrives.
        producer.push_slice(&[1, 2, 3, 4, 5]);
        let first = stream.next().unwrap();
        assert_eq!(first.frames(), 2);
        assert_eq!(frame_samples(&first), vec![1, 2, 3, 4]);

        producer.push_slice(&[6]);
        let second = stream.next().unwrap();
        assert_eq!(second.frames(), 1);
        assert_eq!(frame_samples(&second), vec![5, 6]);

        drop(stream);
        producer.push_slice(&[0, 0]);
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn async_stream_yields_frames_in_capture_order() {
        let (mut producer, consumer) = create_capture_ring();
        let (tx, rx) = tokio::sync::mpsc::channel(ASYNC_QUEUE_DEPTH);
        let handle = thread::spawn(move || {
            run_capture_loop(consumer, 1, 24_000, FAST_POLL, move |frame| {
                tx.blocking_send(frame).is_ok()
            })
        });
        let mut stream = AsyncCaptureStream { rx };

        let waves: [&[i16]; 3] = [&[21, 22], &[23], &[24, 25, 26]];
        for wave in waves {
            producer.push_slice(wave);
            let frame = stream.next().await.unwrap();
            assert_eq!(frame_samples(&frame), wave);
        }

        // Dropping the stream turns the next submission into the shutdown
        // signal; the capture thread exits cleanly.
        drop(stream);
        producer.push_slice(&[0]);
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn full_async_queue_stalls_capture_instead_of_dropping() {
        let (mut producer, consumer) = create_capture_ring();
        // Depth 1 wedges the capture thread on its second submission.
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let handle = thread::spawn(move || {
            run_capture_loop(consumer, 1, 24_000, FAST_POLL, move |frame| {
                tx.blocking_send(frame).is_ok()
            })
        });
        let mut stream = AsyncCaptureStream { rx };

        // Produce everything before reading anything back; the queue fills
        // and the capture thread stalls rather than dropping frames.
        for wave in [[31i16, 32], [33, 34], [35, 36]] {
            producer.push_slice(&wave);
            thread::sleep(Duration::from_millis(5));
        }

        let mut collected = Vec::new();
        while collected.len() < 6 {
            let frame = stream.next().await.unwrap();
            collected.extend_from_slice(&frame_samples(&frame));
        }
        assert_eq!(collected, vec![31, 32, 33, 34, 35, 36]);

        drop(stream);
        producer.push_slice(&[0]);
        handle.join().unwrap();
    }

    fn frame_samples(frame: &PcmBuffer) -> Vec<i16> {
        frame
            .data()
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }
}
