//! `canto` — diagnostics and playback/capture demos for the canto SDK.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use canto_core::pcm::convert::to_canonical;
use canto_core::{
    capabilities, capture_stream, decode, list_input_devices, play_audio, play_raw_audio,
    Availability, CaptureConfig, DeviceInfo, PcmFormat,
};

const USAGE: &str = "\
Usage: canto [subcommand]

Subcommands:
  diag [--json]               print version, platform, and collaborator
                              availability (the default when none is given)
  devices                     list audio input devices
  play <file.wav> [--choppy]  play a WAV file; --choppy feeds it in jittery
                              one-second slices to demonstrate gapless delivery
  echo [--device <index>]     loop microphone frames straight back to the output";

/// Sinks keep sounding after the last enqueue: device warmup, ring drain,
/// and player-side buffering all outlive the final frame.
const PLAYBACK_TAIL: Duration = Duration::from_millis(500);

enum Command {
    Diag { json: bool },
    Devices,
    Play { file: PathBuf, choppy: bool },
    Echo { device: Option<usize> },
}

fn main() {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canto=info".parse().unwrap()),
        )
        .init();

    let command = match parse_args() {
        Ok(command) => command,
        Err(e) => {
            eprintln!("error: {e}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(command) {
        eprintln!("canto failed: {e:#}");
        std::process::exit(1);
    }
}

fn parse_args() -> Result<Command, String> {
    let mut it = std::env::args().skip(1);

    let Some(first) = it.next() else {
        return Ok(Command::Diag { json: false });
    };

    let command = match first.as_str() {
        "diag" => {
            let mut json = false;
            for arg in it.by_ref() {
                match arg.as_str() {
                    "--json" => json = true,
                    other => return Err(format!("unknown argument: {other}")),
                }
            }
            Command::Diag { json }
        }
        "devices" => Command::Devices,
        "play" => {
            let mut file: Option<PathBuf> = None;
            let mut choppy = false;
            for arg in it.by_ref() {
                match arg.as_str() {
                    "--choppy" => choppy = true,
                    other if file.is_none() && !other.starts_with('-') => {
                        file = Some(PathBuf::from(other));
                    }
                    other => return Err(format!("unknown argument: {other}")),
                }
            }
            let Some(file) = file else {
                return Err("play needs a WAV file path".into());
            };
            Command::Play { file, choppy }
        }
        "echo" => {
            let mut device: Option<usize> = None;
            while let Some(arg) = it.next() {
                match arg.as_str() {
                    "--device" => {
                        let Some(v) = it.next() else {
                            return Err("missing value for --device".into());
                        };
                        device = Some(
                            v.parse::<usize>()
                                .map_err(|_| "invalid value for --device".to_string())?,
                        );
                    }
                    other => return Err(format!("unknown argument: {other}")),
                }
            }
            Command::Echo { device }
        }
        "--help" | "-h" => {
            println!("{USAGE}");
            std::process::exit(0);
        }
        other => return Err(format!("unknown subcommand: {other}")),
    };

    if let Some(extra) = it.next() {
        return Err(format!("unknown argument: {extra}"));
    }
    Ok(command)
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Diag { json } => diag(json),
        Command::Devices => devices(),
        Command::Play { file, choppy } => play(&file, choppy),
        Command::Echo { device } => echo(device),
    }
}

fn diag(json: bool) -> anyhow::Result<()> {
    let caps = capabilities();
    let devices = list_input_devices();

    if json {
        let doc = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "capabilities": caps,
            "inputDevices": devices.ok(),
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!(
        "canto {} ({}/{})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    println!();
    println!("collaborators:");
    println!("  output device  {}", describe(&caps.output_device));
    println!("  input device   {}", describe(&caps.input_device));
    println!("  player         {}", describe(&caps.player));
    println!();
    match devices {
        Ok(list) => print_device_table(&list),
        Err(e) => println!("input devices unavailable: {e}"),
    }
    Ok(())
}

fn describe(availability: &Availability) -> String {
    match availability {
        Availability::Available { detail } => format!("available ({detail})"),
        Availability::Unavailable { reason } => format!("unavailable: {reason}"),
    }
}

fn devices() -> anyhow::Result<()> {
    let list = list_input_devices()?;
    print_device_table(&list);
    Ok(())
}

fn print_device_table(devices: &[DeviceInfo]) {
    if devices.is_empty() {
        println!("input devices: none");
        return;
    }
    println!("input devices:");
    for device in devices {
        println!(
            "  {:>2}  {} ({} ch){}",
            device.index,
            device.name,
            device.channels,
            if device.is_default { "  [default]" } else { "" }
        );
    }
}

fn play(file: &Path, choppy: bool) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;

    if choppy {
        return play_choppy(&bytes);
    }

    // Enqueueing returns immediately; stay alive until the clip has sounded.
    let duration = decode(&bytes)?.duration();
    play_audio(&bytes)?;
    info!(?duration, "clip enqueued, waiting for playback to finish");
    thread::sleep(duration + PLAYBACK_TAIL);
    Ok(())
}

/// Feed one-second slices with just-under-one-second pauses between them.
/// The pauses are producer jitter; delivery absorbs them without a seam.
fn play_choppy(bytes: &[u8]) -> anyhow::Result<()> {
    const SLICE_BYTES: usize = 48_000;

    let data = to_canonical(&decode(bytes)?)?.into_data();
    let slices: Vec<&[u8]> = data.chunks(SLICE_BYTES).collect();
    let total = slices.len();
    for (i, slice) in slices.iter().enumerate() {
        play_raw_audio(slice.to_vec(), PcmFormat::CANONICAL)?;
        info!(slice = i + 1, total, "slice enqueued");
        if i + 1 < total {
            thread::sleep(Duration::from_millis(950));
        }
    }
    thread::sleep(Duration::from_secs(1) + PLAYBACK_TAIL);
    Ok(())
}

fn echo(device: Option<usize>) -> anyhow::Result<()> {
    let config = CaptureConfig {
        device_index: device,
        ..CaptureConfig::default()
    };
    let stream = capture_stream(config)?;
    info!("echoing microphone to output (ctrl-c to stop)");
    for frame in stream {
        let format = frame.format();
        play_raw_audio(frame.into_data(), format)?;
    }
    Ok(())
}
