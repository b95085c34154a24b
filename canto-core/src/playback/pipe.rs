//! Pipe-process sink: feeds a spawned player over its stdin.
//!
//! ## Delivery loop (per iteration)
//!
//! ```text
//! 1. Non-blocking dequeue
//! 2. Got a buffer  → write + flush, playing_until += buffer duration
//!    (bursts run ahead of wall clock to drain backlog as fast as the
//!     pipe accepts it)
//! 3. Queue empty   → compare playing_until to now:
//!    a. still in the future → sleep toward the midpoint of the remaining
//!       playback, capped at 50 ms
//!    b. already passed      → write one 50 ms silence block, flush,
//!       sleep 50 ms, reset playing_until to now
//! ```
//!
//! The silence blocks keep the player's output clock running while its input
//! pipe is starved; `playing_until` is computed from cumulative buffer
//! durations so no feedback channel from the player is needed.

use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::{debug, error, info};

use crate::capability::PLAYER_PROGRAM;
use crate::error::{CantoError, Result};
use crate::pcm::{convert, PcmBuffer, PcmFormat};

use super::AudioSink;

/// Idle pacing quantum: the silence block length and the sleep cap.
const SILENCE_TICK: Duration = Duration::from_millis(50);

/// Sink that pipes canonical PCM into an external player process.
///
/// The player and the delivery thread are spawned lazily on the first `play`.
/// If the delivery thread later dies (player exit, broken pipe), enqueueing
/// keeps succeeding into a queue nothing drains; recovery is out of scope.
pub struct PipeProcessSink {
    tx: Sender<PcmBuffer>,
    rx: Receiver<PcmBuffer>,
    started: bool,
}

impl PipeProcessSink {
    pub const NAME: &'static str = "pipe-process";

    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            started: false,
        }
    }

    /// Spawn the player and its delivery thread once.
    ///
    /// On failure the sink stays unstarted, so the next `play` retries; the
    /// buffers enqueued meanwhile are preserved and drain on success.
    fn ensure_started(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        let mut player = spawn_player()?;
        let stdin = player
            .stdin
            .take()
            .ok_or_else(|| CantoError::Player("player process exposes no stdin pipe".into()))?;

        info!(program = PLAYER_PROGRAM, pid = player.id(), "player process started");

        let queue = self.rx.clone();
        thread::Builder::new()
            .name("canto-pipe-delivery".into())
            .spawn(move || {
                PipeDeliveryLoop::new(stdin, queue).run();
                // Loop exit dropped stdin; the player drains what it has
                // buffered, sees EOF, and exits. Reap it.
                let _ = player.wait();
            })?;

        self.started = true;
        Ok(())
    }
}

impl Default for PipeProcessSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for PipeProcessSink {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn play(&mut self, buffer: PcmBuffer) -> Result<()> {
        let buffer = convert::to_canonical(&buffer)?;
        // Enqueue before spawning so the delivery thread finds work on its
        // very first poll instead of opening with a silence block.
        if self.tx.send(buffer).is_err() {
            return Err(CantoError::Player("delivery queue is closed".into()));
        }
        self.ensure_started()
    }
}

/// Player invocation: no display window, raw s16le mono 24 kHz on stdin,
/// stdout/stderr discarded. Write-only; the player is never read back.
fn spawn_player() -> Result<Child> {
    Command::new(PLAYER_PROGRAM)
        .args(["-nodisp", "-f", "s16le", "-ar", "24000", "-acodec", "pcm_s16le", "-i", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| CantoError::Player(format!("failed to spawn {PLAYER_PROGRAM}: {e}")))
}

/// The pacing loop between the delivery queue and one pipe writer.
///
/// Generic over the writer so the timing behaviour can be driven against an
/// in-memory sink as well as a real process pipe.
pub struct PipeDeliveryLoop<W: Write> {
    writer: W,
    queue: Receiver<PcmBuffer>,
    playing_until: Instant,
    silence: Vec<u8>,
}

impl<W: Write> PipeDeliveryLoop<W> {
    pub fn new(writer: W, queue: Receiver<PcmBuffer>) -> Self {
        Self {
            writer,
            queue,
            playing_until: Instant::now(),
            silence: PcmBuffer::silence(PcmFormat::CANONICAL, SILENCE_TICK).into_data(),
        }
    }

    /// Instant at which the last written real audio byte finishes sounding.
    pub fn playing_until(&self) -> Instant {
        self.playing_until
    }

    /// Run until the queue disconnects or the pipe dies.
    pub fn run(mut self) {
        info!("pipe delivery started");
        while self.step() {}
        info!("pipe delivery stopped");
    }

    /// One iteration of the delivery algorithm. Returns `false` when the
    /// loop should stop.
    pub fn step(&mut self) -> bool {
        match self.queue.try_recv() {
            Ok(buffer) => {
                let duration = buffer.duration();
                if let Err(e) = Self::write_block(&mut self.writer, buffer.data()) {
                    error!(error = %e, "player pipe write failed — stopping delivery");
                    return false;
                }
                self.playing_until += duration;
                true
            }
            Err(TryRecvError::Empty) => {
                let remaining = self.playing_until.saturating_duration_since(Instant::now());
                if remaining > Duration::ZERO {
                    // Check back around the midpoint of remaining playback,
                    // at most one tick out, so new work is never overslept.
                    thread::sleep(remaining.min(SILENCE_TICK).max(remaining / 2));
                } else {
                    // Starved pipe: keep the player's clock running.
                    if let Err(e) = Self::write_block(&mut self.writer, &self.silence) {
                        error!(error = %e, "silence write failed — stopping delivery");
                        return false;
                    }
                    thread::sleep(SILENCE_TICK);
                    self.playing_until = Instant::now();
                }
                true
            }
            Err(TryRecvError::Disconnected) => {
                debug!("delivery queue disconnected — stopping delivery");
                false
            }
        }
    }

    fn write_block(writer: &mut W, data: &[u8]) -> std::io::Result<()> {
        writer.write_all(data)?;
        writer.flush()
    }
}
