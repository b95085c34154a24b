//! Lock-free SPSC ring buffers between the cpal callbacks and worker threads.
//!
//! Uses `ringbuf::HeapRb`, whose wait-free `push_slice`/`pop_slice` are safe
//! to call from the real-time audio callbacks.

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half of the capture ring — held by the input callback.
pub type CaptureProducer = ringbuf::HeapProd<i16>;

/// Consumer half of the capture ring — held by the capture thread.
pub type CaptureConsumer = ringbuf::HeapCons<i16>;

/// Capture capacity: 2^18 = 262 144 i16 samples ≈ 10.9 s at 24 kHz.
/// Headroom for consumers that stall briefly; overflow drops are logged.
pub const CAPTURE_RING_CAPACITY: usize = 1 << 18;

/// Producer half of the playback ring — held by the device delivery thread.
pub type PlaybackProducer = ringbuf::HeapProd<f32>;

/// Consumer half of the playback ring — held by the output callback.
pub type PlaybackConsumer = ringbuf::HeapCons<f32>;

/// Playback capacity: 2^16 = 65 536 f32 samples ≈ 2.7 s at 24 kHz.
/// Deliberately modest — the delivery thread paces itself by backing off
/// while the ring is full, which keeps device-side buffering bounded.
pub const PLAYBACK_RING_CAPACITY: usize = 1 << 16;

/// Create a matched producer/consumer pair for capture.
pub fn create_capture_ring() -> (CaptureProducer, CaptureConsumer) {
    HeapRb::<i16>::new(CAPTURE_RING_CAPACITY).split()
}

/// Create a matched producer/consumer pair for device playback.
pub fn create_playback_ring() -> (PlaybackProducer, PlaybackConsumer) {
    HeapRb::<f32>::new(PLAYBACK_RING_CAPACITY).split()
}
