//! Blocking-call fallback sink: last resort when neither a device nor a
//! pipe-fed player is available.
//!
//! One pending-buffer slot replaces the delivery queue: buffers arriving
//! while another is sounding are concatenated and played back-to-back in a
//! single call. That keeps bursts gap-free, but offers no pacing at all, so
//! the selector warns when this sink is chosen.

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::{error, info, warn};

use crate::error::{CantoError, Result};
use crate::pcm::PcmBuffer;

use super::AudioSink;

/// Plays one whole buffer synchronously, returning once it stops sounding.
pub trait BlockingPlayer: Send + 'static {
    fn play_to_completion(&mut self, buffer: &PcmBuffer) -> Result<()>;
}

/// The single merge slot shared between `play` and the playback thread.
struct PendingSlot {
    buffer: Mutex<Option<PcmBuffer>>,
    ready: Condvar,
}

/// Sink that hands merged buffers to a `BlockingPlayer`, one at a time.
///
/// Buffers are played in the format they arrive in — no canonical
/// conversion — so a format change between a pending buffer and a new one
/// surfaces as `FormatMismatch` to the caller.
pub struct BlockingCallSink {
    pending: Arc<PendingSlot>,
    player: Arc<Mutex<Option<Box<dyn BlockingPlayer>>>>,
    started: bool,
}

impl BlockingCallSink {
    pub const NAME: &'static str = "blocking-call";

    pub fn new(player: Box<dyn BlockingPlayer>) -> Self {
        Self {
            pending: Arc::new(PendingSlot {
                buffer: Mutex::new(None),
                ready: Condvar::new(),
            }),
            player: Arc::new(Mutex::new(Some(player))),
            started: false,
        }
    }

    /// Start the playback thread once; the thread claims the parked player.
    ///
    /// On failure the player stays parked and the sink unstarted, so the
    /// next `play` retries. Player failures inside the loop are logged and
    /// the buffer dropped; the thread keeps serving later buffers.
    fn ensure_started(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        let pending = Arc::clone(&self.pending);
        let parked = Arc::clone(&self.player);
        thread::Builder::new()
            .name("canto-blocking-playback".into())
            .spawn(move || {
                let Some(mut player) = parked.lock().take() else {
                    return;
                };
                loop {
                    let buffer = {
                        let mut slot = pending.buffer.lock();
                        loop {
                            if let Some(buffer) = slot.take() {
                                break buffer;
                            }
                            pending.ready.wait(&mut slot);
                        }
                    };
                    if let Err(e) = player.play_to_completion(&buffer) {
                        error!(error = %e, "blocking playback failed — buffer dropped");
                    }
                }
            })?;

        self.started = true;
        Ok(())
    }
}

impl AudioSink for BlockingCallSink {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn play(&mut self, buffer: PcmBuffer) -> Result<()> {
        // Merge before the lazy start so a failed spawn keeps the audio
        // pending for the next attempt.
        {
            let mut pending = self.pending.buffer.lock();
            // Merge before replacing the slot: a mismatched buffer must not
            // knock out the audio already waiting.
            let merged = match pending.as_ref() {
                Some(waiting) => waiting.concat(&buffer)?,
                None => buffer,
            };
            *pending = Some(merged);
            self.pending.ready.notify_one();
        }
        self.ensure_started()
    }
}

// ── WAV command player ───────────────────────────────────────────────────────

struct Candidate {
    program: &'static str,
    version_flag: &'static str,
    play_args: &'static [&'static str],
}

/// Probed in order on first use; `ffplay` leads so a manually-constructed
/// fallback behaves like the pipe sink's player when it is around after all.
const CANDIDATES: &[Candidate] = &[
    Candidate {
        program: "ffplay",
        version_flag: "-version",
        play_args: &["-autoexit", "-nodisp", "-loglevel", "quiet"],
    },
    Candidate {
        program: "aplay",
        version_flag: "--version",
        play_args: &["-q"],
    },
    Candidate {
        program: "paplay",
        version_flag: "--version",
        play_args: &[],
    },
];

fn resolved_candidate() -> Option<&'static Candidate> {
    static RESOLVED: OnceLock<Option<&'static Candidate>> = OnceLock::new();
    *RESOLVED.get_or_init(|| {
        let found = CANDIDATES.iter().find(|candidate| {
            Command::new(candidate.program)
                .arg(candidate.version_flag)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|status| status.success())
                .unwrap_or(false)
        });
        match found {
            Some(candidate) => info!(program = candidate.program, "resolved wav player"),
            None => warn!("no wav player found (tried ffplay, aplay, paplay)"),
        }
        found
    })
}

/// `BlockingPlayer` that round-trips each buffer through a temporary WAV
/// file handed to the first runnable command-line player.
pub struct WavCommandPlayer;

impl WavCommandPlayer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WavCommandPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockingPlayer for WavCommandPlayer {
    fn play_to_completion(&mut self, buffer: &PcmBuffer) -> Result<()> {
        let candidate = resolved_candidate().ok_or_else(|| CantoError::MissingDependency {
            capability: "wav player",
            reason: "none of ffplay, aplay, or paplay is runnable".into(),
        })?;

        let path = write_temp_wav(buffer)?;
        let status = Command::new(candidate.program)
            .args(candidate.play_args)
            .arg(&path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        let _ = fs::remove_file(&path);

        let status = status.map_err(|e| {
            CantoError::Player(format!("{} failed to run: {e}", candidate.program))
        })?;
        if !status.success() {
            return Err(CantoError::Player(format!(
                "{} exited with {status}",
                candidate.program
            )));
        }
        Ok(())
    }
}

fn write_temp_wav(buffer: &PcmBuffer) -> Result<PathBuf> {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let path = std::env::temp_dir().join(format!(
        "canto-{}-{}.wav",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let format = buffer.format();
    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.frame_rate,
        bits_per_sample: format.sample_width * 8,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec)
        .map_err(|e| CantoError::Player(format!("failed to create temp wav: {e}")))?;

    let data = buffer.data();
    let write_result: std::result::Result<(), hound::Error> = match format.sample_width {
        1 => data
            .iter()
            .try_for_each(|&b| writer.write_sample(i32::from(b as i8))),
        2 => data.chunks_exact(2).try_for_each(|c| {
            writer.write_sample(i32::from(i16::from_le_bytes([c[0], c[1]])))
        }),
        4 => data.chunks_exact(4).try_for_each(|c| {
            writer.write_sample(i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        }),
        other => {
            return Err(CantoError::InvalidPcm(format!(
                "unsupported sample width {other}"
            )))
        }
    };
    write_result
        .and_then(|()| writer.finalize())
        .map_err(|e| CantoError::Player(format!("failed to write temp wav: {e}")))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::{Duration, Instant};

    use crossbeam_channel::{Receiver, Sender};

    use crate::pcm::PcmFormat;

    /// Records what it was asked to play and holds each call open until the
    /// gate fires, standing in for the buffer's real sounding time.
    struct ScriptedPlayer {
        played: Arc<Mutex<Vec<Vec<u8>>>>,
        gate: Receiver<()>,
    }

    impl BlockingPlayer for ScriptedPlayer {
        fn play_to_completion(&mut self, buffer: &PcmBuffer) -> Result<()> {
            self.played.lock().push(buffer.data().to_vec());
            let _ = self.gate.recv();
            Ok(())
        }
    }

    struct FailingPlayer {
        attempts: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl BlockingPlayer for FailingPlayer {
        fn play_to_completion(&mut self, buffer: &PcmBuffer) -> Result<()> {
            self.attempts.lock().push(buffer.data().to_vec());
            Err(CantoError::Player("intentional test failure".into()))
        }
    }

    fn gated_sink() -> (BlockingCallSink, Arc<Mutex<Vec<Vec<u8>>>>, Sender<()>) {
        let played = Arc::new(Mutex::new(Vec::new()));
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let sink = BlockingCallSink::new(Box::new(ScriptedPlayer {
            played: Arc::clone(&played),
            gate: gate_rx,
        }));
        (sink, played, gate_tx)
    }

    fn canonical(fill: u8, bytes: usize) -> PcmBuffer {
        PcmBuffer::new(vec![fill; bytes], PcmFormat::CANONICAL).unwrap()
    }

    fn wait_until(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(1);
        while !condition() {
            if Instant::now() >= deadline {
                panic!("timed out waiting for {what}");
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn buffers_arriving_mid_playback_merge_into_one_call() {
        let (mut sink, played, gate) = gated_sink();

        sink.play(canonical(1, 4)).unwrap();
        wait_until("first buffer to start playing", || played.lock().len() == 1);

        // Both land while the first is still sounding, so they merge.
        sink.play(canonical(2, 4)).unwrap();
        sink.play(canonical(3, 4)).unwrap();
        gate.send(()).unwrap();
        wait_until("merged buffer to start playing", || {
            played.lock().len() == 2
        });
        gate.send(()).unwrap();

        let played = played.lock();
        assert_eq!(played[0], vec![1u8; 4]);
        let mut merged = vec![2u8; 4];
        merged.extend_from_slice(&[3u8; 4]);
        assert_eq!(played[1], merged);
    }

    #[test]
    fn format_mismatch_on_merge_surfaces_to_the_caller() {
        let (mut sink, played, gate) = gated_sink();

        sink.play(canonical(1, 4)).unwrap();
        wait_until("first buffer to start playing", || played.lock().len() == 1);
        sink.play(canonical(2, 4)).unwrap();

        let clashing = PcmBuffer::new(vec![0u8; 4], PcmFormat::new(2, 1, 48_000)).unwrap();
        let err = sink.play(clashing).unwrap_err();
        assert!(matches!(err, CantoError::FormatMismatch { .. }));

        // The buffer that was waiting is not lost to the failed merge.
        gate.send(()).unwrap();
        wait_until("pending buffer to play", || played.lock().len() == 2);
        assert_eq!(played.lock()[1], vec![2u8; 4]);
    }

    #[test]
    fn player_errors_do_not_stop_the_playback_thread() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let mut sink = BlockingCallSink::new(Box::new(FailingPlayer {
            attempts: Arc::clone(&attempts),
        }));

        sink.play(canonical(1, 4)).unwrap();
        wait_until("first attempt", || attempts.lock().len() == 1);
        sink.play(canonical(2, 4)).unwrap();
        wait_until("second attempt", || attempts.lock().len() == 2);

        let attempts = attempts.lock();
        assert_eq!(attempts[0], vec![1u8; 4]);
        assert_eq!(attempts[1], vec![2u8; 4]);
    }

    #[test]
    fn player_stays_parked_until_the_playback_thread_claims_it() {
        let (mut sink, played, _gate) = gated_sink();
        assert!(sink.player.lock().is_some());

        // The first play posts the buffer and only then starts the thread;
        // the parked player is claimed by the thread, never consumed early.
        sink.play(canonical(1, 4)).unwrap();
        wait_until("the thread to claim the player", || {
            sink.player.lock().is_none()
        });
        wait_until("first buffer to start playing", || played.lock().len() == 1);
    }

    #[test]
    fn temp_wav_round_trips_through_hound() {
        let buffer = PcmBuffer::from_i16_samples(&[100, -200, 300], 1, 24_000);
        let path = write_temp_wav(&buffer).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 24_000);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![100, -200, 300]);

        fs::remove_file(&path).unwrap();
    }
}
