//! Device sink: plays through the default output device via `cpal`.
//!
//! The delivery thread owns both the `cpal::Stream` (it is not `Send`) and
//! the producer half of the playback ring; the real-time output callback
//! pops from the consumer half and pads underruns with silence. Feeding the
//! ring in half-second sub-chunks, blocking while it is full, is what paces
//! delivery to the device clock.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info};

use crate::error::{CantoError, Result};
use crate::pcm::{convert, PcmBuffer, PcmFormat};
use crate::ring::{self, Consumer, PlaybackConsumer, PlaybackProducer, Producer};

use super::AudioSink;

/// Settle time before the first ring write, avoiding start-up crunch.
const WARMUP: Duration = Duration::from_millis(100);

/// Ring write granularity: 500 ms of canonical audio per push.
const SUB_CHUNK_BYTES: usize = 24_000;

/// Backoff between retries while the ring is full.
const RING_FULL_BACKOFF: Duration = Duration::from_millis(5);

/// Sink that feeds the default output device through a lock-free ring.
///
/// The stream and the delivery thread are created lazily on the first
/// `play`; if opening the device fails, the sink stays unstarted and the
/// next `play` retries with the enqueued buffers preserved.
pub struct DeviceSink {
    tx: Sender<PcmBuffer>,
    rx: Receiver<PcmBuffer>,
    started: bool,
}

impl DeviceSink {
    pub const NAME: &'static str = "device";

    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            started: false,
        }
    }

    fn ensure_started(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        let queue = self.rx.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        thread::Builder::new()
            .name("canto-device-delivery".into())
            .spawn(move || {
                let (producer, consumer) = ring::create_playback_ring();
                // The stream must be built on this thread (it is not Send)
                // and kept alive for as long as delivery runs.
                let _stream = match open_output_stream(consumer) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                run_delivery(producer, queue, WARMUP);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("output device opened");
                self.started = true;
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CantoError::AudioStream(
                "device delivery thread died during startup".into(),
            )),
        }
    }
}

impl Default for DeviceSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for DeviceSink {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn play(&mut self, buffer: PcmBuffer) -> Result<()> {
        let buffer = convert::to_canonical(&buffer)?;
        if self.tx.send(buffer).is_err() {
            return Err(CantoError::AudioStream("delivery queue is closed".into()));
        }
        self.ensure_started()
    }
}

fn open_output_stream(mut consumer: PlaybackConsumer) -> Result<Stream> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or(CantoError::NoDefaultOutputDevice)?;

    let config = StreamConfig {
        channels: PcmFormat::CANONICAL.channels,
        sample_rate: SampleRate(PcmFormat::CANONICAL.frame_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                fill_from_ring(&mut consumer, data);
            },
            |err| error!(error = %err, "output stream error"),
            None,
        )
        .map_err(|e| CantoError::AudioStream(e.to_string()))?;
    stream
        .play()
        .map_err(|e| CantoError::AudioStream(e.to_string()))?;
    Ok(stream)
}

/// Real-time callback body: drain the ring, pad underruns with silence.
fn fill_from_ring(consumer: &mut PlaybackConsumer, data: &mut [f32]) {
    let n = consumer.pop_slice(data);
    data[n..].fill(0.0);
}

/// Drain the delivery queue into the ring until every sender is gone.
fn run_delivery(mut producer: PlaybackProducer, queue: Receiver<PcmBuffer>, warmup: Duration) {
    thread::sleep(warmup);
    info!("device delivery started");
    for buffer in queue.iter() {
        for chunk in buffer.data().chunks(SUB_CHUNK_BYTES) {
            push_samples(&mut producer, chunk);
        }
    }
    debug!("delivery queue disconnected — stopping delivery");
}

/// The blocking device write: convert one sub-chunk to f32 and push all of
/// it, backing off while the ring is full.
fn push_samples(producer: &mut PlaybackProducer, chunk: &[u8]) {
    let samples: Vec<f32> = chunk
        .chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32_768.0)
        .collect();

    let mut offset = 0;
    while offset < samples.len() {
        offset += producer.push_slice(&samples[offset..]);
        if offset < samples.len() {
            thread::sleep(RING_FULL_BACKOFF);
        }
    }
}
