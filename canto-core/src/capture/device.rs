//! Input device enumeration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Metadata about one audio input device.
///
/// `index` is positional within the host's input device list and is the
/// value `CaptureConfig::device_index` accepts; the list is reported
/// unsorted to keep that correspondence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Position in the host's input device enumeration.
    pub index: usize,
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Channel count of the device's default input configuration.
    pub channels: u16,
    /// Whether this is the system default input device.
    pub is_default: bool,
}

/// List all available audio input devices on the system.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Result<Vec<DeviceInfo>> {
    use cpal::traits::{DeviceTrait, HostTrait};

    use crate::error::CantoError;

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| CantoError::AudioDevice(e.to_string()))?;

    Ok(devices
        .enumerate()
        .map(|(index, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Input Device {}", index + 1));
            let channels = device
                .default_input_config()
                .map(|c| c.channels())
                .unwrap_or(0);
            let is_default = default_name.as_deref() == Some(name.as_str());
            DeviceInfo {
                index,
                name,
                channels,
                is_default,
            }
        })
        .collect())
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Result<Vec<DeviceInfo>> {
    Err(crate::error::CantoError::MissingDependency {
        capability: "device enumeration",
        reason: "canto was compiled without the audio-cpal feature".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::DeviceInfo;

    // Diagnostics consumers key on these exact JSON field names.
    #[test]
    fn serializes_with_camel_case_keys() {
        let info = DeviceInfo {
            index: 2,
            name: "USB Microphone".into(),
            channels: 1,
            is_default: true,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["index"], 2);
        assert_eq!(json["name"], "USB Microphone");
        assert_eq!(json["channels"], 1);
        assert_eq!(json["isDefault"], true);
    }
}
