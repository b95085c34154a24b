use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use canto_core::pcm::{PcmBuffer, PcmFormat};
use canto_core::playback::pipe::PipeDeliveryLoop;

/// Records every byte the delivery loop flushes into the "player".
#[derive(Clone, Default)]
struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl SharedWriter {
    fn written(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn wait_until(what: &str, timeout: Duration, mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() >= timeout {
            panic!("timed out waiting for {what}");
        }
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn concurrent_producers_lose_nothing_and_keep_their_order() {
    let (tx, rx) = crossbeam_channel::unbounded();

    // Four producers race to enqueue five buffers each; the first byte of a
    // buffer names its producer, the second its sequence number.
    let producers: Vec<_> = (1u8..=4)
        .map(|producer| {
            let tx = tx.clone();
            thread::spawn(move || {
                for seq in 0..5u8 {
                    let mut data = vec![producer; 24_000];
                    data[1] = seq;
                    tx.send(PcmBuffer::new(data, PcmFormat::CANONICAL).unwrap())
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in producers {
        handle.join().expect("producer thread panicked");
    }
    drop(tx);

    let writer = SharedWriter::default();
    let delivery = thread::spawn({
        let writer = writer.clone();
        move || PipeDeliveryLoop::new(writer, rx).run()
    });
    delivery.join().expect("delivery thread panicked");

    let written = writer.written();
    assert_eq!(written.len(), 4 * 5 * 24_000);

    let mut next_seq = [0u8; 5];
    for chunk in written.chunks_exact(24_000) {
        let producer = chunk[0] as usize;
        assert!((1..=4).contains(&producer), "unexpected marker {producer}");
        assert_eq!(
            chunk[1], next_seq[producer],
            "producer {producer} delivered out of order"
        );
        next_seq[producer] += 1;
    }
    assert_eq!(&next_seq[1..], &[5, 5, 5, 5]);
}

#[test]
fn starved_delivery_pads_with_silence_only_after_full_payload() {
    let (tx, rx) = crossbeam_channel::unbounded();

    // One second of audible payload, enqueued before the loop starts.
    tx.send(PcmBuffer::new(vec![7; 48_000], PcmFormat::CANONICAL).unwrap())
        .unwrap();

    let writer = SharedWriter::default();
    let start = Instant::now();
    let delivery = thread::spawn({
        let writer = writer.clone();
        move || PipeDeliveryLoop::new(writer, rx).run()
    });

    wait_until("the first silence block", Duration::from_secs(3), || {
        writer.written().len() > 48_000
    });
    let first_silence_at = start.elapsed();

    drop(tx);
    delivery.join().expect("delivery thread panicked");

    // The payload reaches the player untouched; silence starts only once
    // the payload has finished sounding, in whole 50 ms blocks.
    let written = writer.written();
    assert!(written[..48_000].iter().all(|&b| b == 7));
    let padding = &written[48_000..];
    assert!(!padding.is_empty());
    assert_eq!(padding.len() % 2_400, 0);
    assert!(padding.iter().all(|&b| b == 0));
    assert!(
        first_silence_at >= Duration::from_millis(950),
        "silence began at {:?}, before the payload finished sounding",
        first_silence_at
    );
}
