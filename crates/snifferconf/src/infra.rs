//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths for daemon state and trace files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Base directory for runtime state (the finished-task archive).
    /// Default: ~/.local/share/snifferd
    #[serde(default = "PathsConfig::default_state_dir")]
    pub state_dir: PathBuf,

    /// Directory the capture device writes trace files into.
    /// Usually also the root of the download (FTP/HTTP) share.
    /// Default: ~/snifferd/traces
    #[serde(default = "PathsConfig::default_capture_dir")]
    pub capture_dir: PathBuf,
}

impl PathsConfig {
    fn default_state_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/snifferd"))
            .unwrap_or_else(|| PathBuf::from(".local/share/snifferd"))
    }

    fn default_capture_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join("snifferd/traces"))
            .unwrap_or_else(|| PathBuf::from("snifferd/traces"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: Self::default_state_dir(),
            capture_dir: Self::default_capture_dir(),
        }
    }
}

/// Network bind addresses for this process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindConfig {
    /// HTTP port for the task endpoints.
    /// Default: 5000
    #[serde(default = "BindConfig::default_http_port")]
    pub http_port: u16,
}

impl BindConfig {
    fn default_http_port() -> u16 {
        5000
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            http_port: Self::default_http_port(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint for OpenTelemetry span export.
    /// Empty disables export; console logging is always on.
    /// Default: "" (disabled)
    #[serde(default)]
    pub otlp_endpoint: String,

    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    /// The OTLP endpoint, or `None` when export is disabled.
    pub fn otlp_endpoint(&self) -> Option<&str> {
        let endpoint = self.otlp_endpoint.trim();
        (!endpoint.is_empty()).then_some(endpoint)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            log_level: Self::default_log_level(),
        }
    }
}

/// Capture loop scheduling and trace publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureLoopConfig {
    /// How often the capture worker checks the task registry.
    /// Default: 500
    #[serde(default = "CaptureLoopConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Split the running trace after this many seconds. Zero or negative
    /// disables splitting.
    /// Default: 120
    #[serde(default = "CaptureLoopConfig::default_split_interval_secs")]
    pub split_interval_secs: i64,

    /// Prefix that turns a trace file name into a download URL,
    /// e.g. "ftp://10.0.0.5/". Empty reports trace paths verbatim.
    #[serde(default)]
    pub trace_url_base: String,

    /// File name of the finished-task archive inside `paths.state_dir`.
    /// Default: tasks.json
    #[serde(default = "CaptureLoopConfig::default_archive_file")]
    pub archive_file: String,
}

impl CaptureLoopConfig {
    fn default_poll_interval_ms() -> u64 {
        500
    }

    fn default_split_interval_secs() -> i64 {
        120
    }

    fn default_archive_file() -> String {
        "tasks.json".to_string()
    }
}

impl Default for CaptureLoopConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: Self::default_poll_interval_ms(),
            split_interval_secs: Self::default_split_interval_secs(),
            trace_url_base: String::new(),
            archive_file: Self::default_archive_file(),
        }
    }
}

/// Infrastructure configuration - cannot change at runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    /// Filesystem paths.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Network bind addresses.
    #[serde(default)]
    pub bind: BindConfig,

    /// Telemetry settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Capture worker settings.
    #[serde(default)]
    pub capture: CaptureLoopConfig,
}

impl InfraConfig {
    /// Full path of the finished-task archive.
    pub fn archive_path(&self) -> PathBuf {
        self.paths.state_dir.join(&self.capture.archive_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_defaults() {
        let paths = PathsConfig::default();
        assert!(paths.state_dir.to_string_lossy().contains("snifferd"));
        assert!(paths.capture_dir.to_string_lossy().contains("traces"));
    }

    #[test]
    fn test_capture_defaults() {
        let capture = CaptureLoopConfig::default();
        assert_eq!(capture.poll_interval_ms, 500);
        assert_eq!(capture.split_interval_secs, 120);
        assert!(capture.trace_url_base.is_empty());
    }

    #[test]
    fn test_otlp_disabled_when_blank() {
        let mut telemetry = TelemetryConfig::default();
        assert_eq!(telemetry.otlp_endpoint(), None);
        telemetry.otlp_endpoint = " 127.0.0.1:4317 ".to_string();
        assert_eq!(telemetry.otlp_endpoint(), Some("127.0.0.1:4317"));
    }

    #[test]
    fn test_archive_path() {
        let mut infra = InfraConfig::default();
        infra.paths.state_dir = PathBuf::from("/var/lib/snifferd");
        assert_eq!(infra.archive_path(), PathBuf::from("/var/lib/snifferd/tasks.json"));
    }
}
