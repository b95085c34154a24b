//! One-shot collaborator availability checks.
//!
//! The sink selector and the CLI both consume a single `Capabilities`
//! snapshot: probing happens once per process and the result is cached, so
//! sink selection is never re-evaluated after the first `play`.

use std::process::{Command, Stdio};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Executable probed for pipe playback; also what the pipe sink spawns.
pub const PLAYER_PROGRAM: &str = "ffplay";

/// Whether one optional collaborator can be used, and why not if not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum Availability {
    /// Usable; `detail` names what was found (device or program name).
    Available { detail: String },
    /// Not usable; `reason` is human-readable and actionable.
    Unavailable { reason: String },
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available { .. })
    }
}

/// Availability of every optional collaborator, probed together.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Device playback backend (`audio-cpal` feature + a default output device).
    pub output_device: Availability,
    /// Device capture backend (`audio-cpal` feature + a default input device).
    pub input_device: Availability,
    /// External player process for pipe playback.
    pub player: Availability,
}

/// Probes every collaborator afresh.
pub fn detect() -> Capabilities {
    Capabilities {
        output_device: probe_output_device(),
        input_device: probe_input_device(),
        player: probe_player(),
    }
}

/// Cached per-process snapshot; the first caller pays for the probes.
pub fn capabilities() -> &'static Capabilities {
    static CAPABILITIES: OnceLock<Capabilities> = OnceLock::new();
    CAPABILITIES.get_or_init(|| {
        let caps = detect();
        debug!(?caps, "collaborator availability probed");
        caps
    })
}

fn probe_player() -> Availability {
    match Command::new(PLAYER_PROGRAM)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => Availability::Available {
            detail: PLAYER_PROGRAM.to_string(),
        },
        Ok(status) => Availability::Unavailable {
            reason: format!("{PLAYER_PROGRAM} -version exited with {status}"),
        },
        Err(e) => Availability::Unavailable {
            reason: format!("{PLAYER_PROGRAM} not runnable: {e}"),
        },
    }
}

#[cfg(feature = "audio-cpal")]
fn probe_output_device() -> Availability {
    use cpal::traits::{DeviceTrait, HostTrait};

    match cpal::default_host().default_output_device() {
        Some(device) => Availability::Available {
            detail: device
                .name()
                .unwrap_or_else(|_| "unnamed output device".into()),
        },
        None => Availability::Unavailable {
            reason: "no default output device".into(),
        },
    }
}

#[cfg(not(feature = "audio-cpal"))]
fn probe_output_device() -> Availability {
    Availability::Unavailable {
        reason: "compiled without the audio-cpal feature".into(),
    }
}

#[cfg(feature = "audio-cpal")]
fn probe_input_device() -> Availability {
    use cpal::traits::{DeviceTrait, HostTrait};

    match cpal::default_host().default_input_device() {
        Some(device) => Availability::Available {
            detail: device
                .name()
                .unwrap_or_else(|_| "unnamed input device".into()),
        },
        None => Availability::Unavailable {
            reason: "no default input device".into(),
        },
    }
}

#[cfg(not(feature = "audio-cpal"))]
fn probe_input_device() -> Availability {
    Availability::Unavailable {
        reason: "compiled without the audio-cpal feature".into(),
    }
}
