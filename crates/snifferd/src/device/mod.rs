//! Capture device driver interface.
//!
//! A driver wraps one physical sniffer. The capture worker is the only
//! caller of the recording operations; the request layer only reads the
//! model and capture configuration.

mod simulated;

pub use simulated::{DeviceCall, SimulatedHandle, SimulatedSniffer};

use serde::{Deserialize, Serialize};
use snifferconf::DeviceConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Capture options a driver understands.
///
/// Known options are typed; anything driver-specific rides in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub wifi_capture_enabled: bool,
    pub wifi_capture_channel: Option<u32>,
    pub spectrum_capture_enabled: bool,
    pub ble_capture_enabled: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            wifi_capture_enabled: false,
            wifi_capture_channel: None,
            spectrum_capture_enabled: false,
            ble_capture_enabled: true,
            extra: BTreeMap::new(),
        }
    }
}

impl From<&DeviceConfig> for CaptureConfig {
    fn from(device: &DeviceConfig) -> Self {
        Self {
            wifi_capture_enabled: device.wifi_capture_enabled,
            wifi_capture_channel: device.wifi_capture_channel,
            spectrum_capture_enabled: device.spectrum_capture_enabled,
            ble_capture_enabled: device.ble_capture_enabled,
            extra: device.extra.clone(),
        }
    }
}

/// One capture device.
///
/// Calls may block for as long as the hardware takes; nothing above this
/// trait imposes a timeout. A driver that can hang should enforce its own.
pub trait SnifferDevice: Send {
    /// Begin recording. Returns true once the device is recording.
    fn start_capture(&mut self) -> bool;

    /// Close the current trace into `trace_path` and keep recording.
    /// Returns the saved path, or `None` if nothing was saved.
    fn split_capture(&mut self, trace_path: &Path) -> Option<PathBuf>;

    /// Stop recording and save the trace into `trace_path`.
    /// Returns the saved path, or `None` if nothing was saved.
    fn stop_capture(&mut self, trace_path: &Path) -> Option<PathBuf>;

    /// Release the device. Recording in progress is discarded.
    fn close(&mut self);

    fn model(&self) -> &str;

    fn is_capturing(&self) -> bool;

    fn is_closed(&self) -> bool;

    fn capture_config(&self) -> CaptureConfig;

    fn set_capture_config(&mut self, config: CaptureConfig);
}
