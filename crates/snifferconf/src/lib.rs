//! Minimal configuration loading for snifferd.
//!
//! # Configuration Philosophy
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): things that cannot change at
//!   runtime - paths, bind port, telemetry, capture loop timing.
//!
//! - **Bootstrap** (`BootstrapConfig`): initial values pushed into the
//!   capture device. After startup the device is the source of truth.
//!
//! # Usage
//!
//! ```rust,no_run
//! use snifferconf::SnifferConfig;
//!
//! let config = SnifferConfig::load().expect("Failed to load config");
//!
//! println!("Traces: {}", config.infra.paths.capture_dir.display());
//! println!("HTTP port: {}", config.infra.bind.http_port);
//! println!("Device: {}", config.bootstrap.device.model);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/snifferd/config.toml` (system)
//! 2. `~/.config/snifferd/config.toml` (user)
//! 3. `./snifferd.toml` (local override, replaced by `--config`)
//! 4. Environment variables (`SNIFFERD_*`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! state_dir = "~/.local/share/snifferd"
//! capture_dir = "/srv/ftp/traces"
//!
//! [bind]
//! http_port = 5000
//!
//! [telemetry]
//! log_level = "info"
//!
//! [capture]
//! poll_interval_ms = 500
//! split_interval_secs = 120
//! trace_url_base = "ftp://10.0.0.5/"
//!
//! [bootstrap.device]
//! model = "Ellisys BXE400"
//! wifi_capture_enabled = true
//! wifi_capture_channel = 6
//!
//! [bootstrap.device.extra]
//! "Analyzer Serial" = "BXE-1234"
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{BootstrapConfig, DeviceConfig};
pub use infra::{BindConfig, CaptureLoopConfig, InfraConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete snifferd configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SnifferConfig {
    /// Infrastructure - cannot change at runtime.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Bootstrap - seeds the device.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl SnifferConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/snifferd/config.toml`
    /// 3. `~/.config/snifferd/config.toml`
    /// 4. `./snifferd.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./snifferd.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = SnifferConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# snifferd configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "state_dir = \"{}\"\n",
            self.infra.paths.state_dir.display()
        ));
        output.push_str(&format!(
            "capture_dir = \"{}\"\n",
            self.infra.paths.capture_dir.display()
        ));

        output.push_str("\n[bind]\n");
        output.push_str(&format!("http_port = {}\n", self.infra.bind.http_port));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "otlp_endpoint = \"{}\"\n",
            self.infra.telemetry.otlp_endpoint
        ));
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.infra.telemetry.log_level
        ));

        output.push_str("\n[capture]\n");
        output.push_str(&format!(
            "poll_interval_ms = {}\n",
            self.infra.capture.poll_interval_ms
        ));
        output.push_str(&format!(
            "split_interval_secs = {}\n",
            self.infra.capture.split_interval_secs
        ));
        output.push_str(&format!(
            "trace_url_base = \"{}\"\n",
            self.infra.capture.trace_url_base
        ));
        output.push_str(&format!(
            "archive_file = \"{}\"\n",
            self.infra.capture.archive_file
        ));

        let device = &self.bootstrap.device;
        output.push_str("\n[bootstrap.device]\n");
        output.push_str(&format!("model = \"{}\"\n", device.model));
        output.push_str(&format!(
            "wifi_capture_enabled = {}\n",
            device.wifi_capture_enabled
        ));
        if let Some(channel) = device.wifi_capture_channel {
            output.push_str(&format!("wifi_capture_channel = {}\n", channel));
        }
        output.push_str(&format!(
            "spectrum_capture_enabled = {}\n",
            device.spectrum_capture_enabled
        ));
        output.push_str(&format!(
            "ble_capture_enabled = {}\n",
            device.ble_capture_enabled
        ));

        if !device.extra.is_empty() {
            output.push_str("\n[bootstrap.device.extra]\n");
            for (key, value) in &device.extra {
                output.push_str(&format!("\"{}\" = {}\n", key, value));
            }
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SnifferConfig::default();
        assert_eq!(config.infra.bind.http_port, 5000);
        assert_eq!(config.infra.capture.split_interval_secs, 120);
        assert!(config.bootstrap.device.ble_capture_enabled);
    }

    #[test]
    fn test_to_toml() {
        let config = SnifferConfig::default();
        let toml = config.to_toml();
        assert!(toml.contains("[paths]"));
        assert!(toml.contains("[capture]"));
        assert!(toml.contains("[bootstrap.device]"));
        assert!(toml.contains("split_interval_secs = 120"));
    }

    #[test]
    fn test_to_toml_parses_back() {
        let mut config = SnifferConfig::default();
        config.bootstrap.device.wifi_capture_channel = Some(11);
        config
            .bootstrap
            .device
            .extra
            .insert("Analyzer Serial".to_string(), serde_json::json!("BXE-1234"));

        let reparsed: SnifferConfig = toml::from_str(&config.to_toml()).unwrap();
        assert_eq!(reparsed.bootstrap.device.wifi_capture_channel, Some(11));
        assert_eq!(
            reparsed.bootstrap.device.extra.get("Analyzer Serial"),
            Some(&serde_json::json!("BXE-1234"))
        );
    }
}
