//! Bootstrap configuration - seeds runtime state, then the device owns it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Initial capture settings pushed to the device at startup.
///
/// After startup the device is the source of truth; `/config` reports what
/// the driver currently holds, not this file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Model name reported by the simulated driver.
    #[serde(default = "DeviceConfig::default_model")]
    pub model: String,

    #[serde(default)]
    pub wifi_capture_enabled: bool,

    /// WiFi channel to follow. Unset lets the driver choose.
    #[serde(default)]
    pub wifi_capture_channel: Option<u32>,

    #[serde(default)]
    pub spectrum_capture_enabled: bool,

    #[serde(default = "DeviceConfig::default_ble_capture_enabled")]
    pub ble_capture_enabled: bool,

    /// Driver-specific keys passed through untouched.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DeviceConfig {
    fn default_model() -> String {
        "Simulated sniffer".to_string()
    }

    fn default_ble_capture_enabled() -> bool {
        true
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            model: Self::default_model(),
            wifi_capture_enabled: false,
            wifi_capture_channel: None,
            spectrum_capture_enabled: false,
            ble_capture_enabled: Self::default_ble_capture_enabled(),
            extra: BTreeMap::new(),
        }
    }
}

/// Bootstrap configuration - seeds runtime, then runtime owns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Capture device settings
    #[serde(default)]
    pub device: DeviceConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_defaults() {
        let device = DeviceConfig::default();
        assert_eq!(device.model, "Simulated sniffer");
        assert!(device.ble_capture_enabled);
        assert!(!device.wifi_capture_enabled);
        assert_eq!(device.wifi_capture_channel, None);
        assert!(device.extra.is_empty());
    }
}
