//! Config file discovery, loading, and environment variable overlay.

use crate::infra::{BindConfig, CaptureLoopConfig, PathsConfig, TelemetryConfig};
use crate::{ConfigError, InfraConfig, SnifferConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/snifferd/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("snifferd/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("snifferd.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<SnifferConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse config from TOML string. Missing sections and keys take defaults.
fn parse_toml(contents: &str, path: &Path) -> Result<SnifferConfig, ConfigError> {
    let mut config: SnifferConfig =
        toml::from_str(contents).map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let paths = &mut config.infra.paths;
    paths.state_dir = expand_path(&paths.state_dir.to_string_lossy());
    paths.capture_dir = expand_path(&paths.capture_dir.to_string_lossy());

    Ok(config)
}

/// Keep `overlay` when it differs from the compiled default, otherwise `base`.
fn pick<T: PartialEq>(overlay: T, base: T, default: &T) -> T {
    if &overlay != default {
        overlay
    } else {
        base
    }
}

/// Merge two configs, with `overlay` taking precedence.
///
/// A value in `overlay` that equals the compiled default does not clobber
/// `base`, so a later file only needs the keys it changes.
pub fn merge_configs(base: SnifferConfig, overlay: SnifferConfig) -> SnifferConfig {
    let paths = PathsConfig::default();
    let bind = BindConfig::default();
    let telemetry = TelemetryConfig::default();
    let capture = CaptureLoopConfig::default();
    let (b, o) = (base.infra, overlay.infra);

    SnifferConfig {
        infra: InfraConfig {
            paths: PathsConfig {
                state_dir: pick(o.paths.state_dir, b.paths.state_dir, &paths.state_dir),
                capture_dir: pick(o.paths.capture_dir, b.paths.capture_dir, &paths.capture_dir),
            },
            bind: BindConfig {
                http_port: pick(o.bind.http_port, b.bind.http_port, &bind.http_port),
            },
            telemetry: TelemetryConfig {
                otlp_endpoint: pick(
                    o.telemetry.otlp_endpoint,
                    b.telemetry.otlp_endpoint,
                    &telemetry.otlp_endpoint,
                ),
                log_level: pick(o.telemetry.log_level, b.telemetry.log_level, &telemetry.log_level),
            },
            capture: CaptureLoopConfig {
                poll_interval_ms: pick(
                    o.capture.poll_interval_ms,
                    b.capture.poll_interval_ms,
                    &capture.poll_interval_ms,
                ),
                split_interval_secs: pick(
                    o.capture.split_interval_secs,
                    b.capture.split_interval_secs,
                    &capture.split_interval_secs,
                ),
                trace_url_base: pick(
                    o.capture.trace_url_base,
                    b.capture.trace_url_base,
                    &capture.trace_url_base,
                ),
                archive_file: pick(
                    o.capture.archive_file,
                    b.capture.archive_file,
                    &capture.archive_file,
                ),
            },
        },
        bootstrap: overlay.bootstrap, // Bootstrap fully replaces for now
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut SnifferConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, env::vars());
}

/// Apply overrides from an explicit set of variables.
pub fn apply_overrides_from(
    config: &mut SnifferConfig,
    sources: &mut ConfigSources,
    vars: impl IntoIterator<Item = (String, String)>,
) {
    for (key, value) in vars {
        let applied = match key.as_str() {
            "SNIFFERD_STATE_DIR" => {
                config.infra.paths.state_dir = expand_path(&value);
                true
            }
            "SNIFFERD_CAPTURE_DIR" => {
                config.infra.paths.capture_dir = expand_path(&value);
                true
            }
            "SNIFFERD_HTTP_PORT" => match value.parse() {
                Ok(port) => {
                    config.infra.bind.http_port = port;
                    true
                }
                Err(_) => false,
            },
            // Also support the standard OTEL env var
            "SNIFFERD_OTLP_ENDPOINT" | "OTEL_EXPORTER_OTLP_ENDPOINT" => {
                config.infra.telemetry.otlp_endpoint = value;
                true
            }
            // Also support RUST_LOG
            "SNIFFERD_LOG_LEVEL" | "RUST_LOG" => {
                config.infra.telemetry.log_level = value;
                true
            }
            "SNIFFERD_POLL_INTERVAL_MS" => match value.parse() {
                Ok(ms) => {
                    config.infra.capture.poll_interval_ms = ms;
                    true
                }
                Err(_) => false,
            },
            "SNIFFERD_SPLIT_INTERVAL_SECS" => match value.parse() {
                Ok(secs) => {
                    config.infra.capture.split_interval_secs = secs;
                    true
                }
                Err(_) => false,
            },
            "SNIFFERD_TRACE_URL_BASE" => {
                config.infra.capture.trace_url_base = value;
                true
            }
            "SNIFFERD_DEVICE_MODEL" => {
                config.bootstrap.device.model = value;
                true
            }
            _ => false,
        };

        if applied {
            sources.env_overrides.push(key);
        }
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let expanded = expand_path("/absolute/path");
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[paths]
state_dir = "/custom/state"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.infra.paths.state_dir, PathBuf::from("/custom/state"));
        assert_eq!(config.infra.bind.http_port, 5000);
        assert_eq!(config.infra.capture.poll_interval_ms, 500);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[paths]
state_dir = "/data/snifferd"
capture_dir = "/srv/ftp/traces"

[bind]
http_port = 9000

[telemetry]
log_level = "debug"
otlp_endpoint = "127.0.0.1:4317"

[capture]
poll_interval_ms = 100
split_interval_secs = 0
trace_url_base = "ftp://10.0.0.5/"

[bootstrap.device]
model = "Ellisys BXE400"
wifi_capture_enabled = true
wifi_capture_channel = 6

[bootstrap.device.extra]
"Analyzer Serial" = "BXE-1234"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();

        assert_eq!(config.infra.paths.state_dir, PathBuf::from("/data/snifferd"));
        assert_eq!(config.infra.paths.capture_dir, PathBuf::from("/srv/ftp/traces"));
        assert_eq!(config.infra.bind.http_port, 9000);
        assert_eq!(config.infra.telemetry.log_level, "debug");
        assert_eq!(config.infra.telemetry.otlp_endpoint(), Some("127.0.0.1:4317"));
        assert_eq!(config.infra.capture.poll_interval_ms, 100);
        assert_eq!(config.infra.capture.split_interval_secs, 0);
        assert_eq!(config.infra.capture.trace_url_base, "ftp://10.0.0.5/");

        let device = &config.bootstrap.device;
        assert_eq!(device.model, "Ellisys BXE400");
        assert!(device.wifi_capture_enabled);
        assert_eq!(device.wifi_capture_channel, Some(6));
        assert!(device.ble_capture_enabled);
        assert_eq!(
            device.extra.get("Analyzer Serial"),
            Some(&serde_json::json!("BXE-1234"))
        );
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = parse_toml("[bind\nhttp_port = ", Path::new("broken.toml")).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_merge_keeps_base_for_default_values() {
        let mut base = SnifferConfig::default();
        base.infra.bind.http_port = 7000;
        base.infra.capture.trace_url_base = "ftp://base/".to_string();

        let mut overlay = SnifferConfig::default();
        overlay.infra.capture.split_interval_secs = 30;

        let merged = merge_configs(base, overlay);
        assert_eq!(merged.infra.bind.http_port, 7000);
        assert_eq!(merged.infra.capture.trace_url_base, "ftp://base/");
        assert_eq!(merged.infra.capture.split_interval_secs, 30);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SnifferConfig::default();
        let mut sources = ConfigSources::default();

        apply_overrides_from(
            &mut config,
            &mut sources,
            vars(&[
                ("SNIFFERD_HTTP_PORT", "6000"),
                ("SNIFFERD_SPLIT_INTERVAL_SECS", "-1"),
                ("SNIFFERD_CAPTURE_DIR", "/tmp/traces"),
                ("SNIFFERD_POLL_INTERVAL_MS", "not-a-number"),
                ("UNRELATED", "x"),
            ]),
        );

        assert_eq!(config.infra.bind.http_port, 6000);
        assert_eq!(config.infra.capture.split_interval_secs, -1);
        assert_eq!(config.infra.paths.capture_dir, PathBuf::from("/tmp/traces"));
        assert_eq!(config.infra.capture.poll_interval_ms, 500);
        assert_eq!(
            sources.env_overrides,
            vec![
                "SNIFFERD_HTTP_PORT".to_string(),
                "SNIFFERD_SPLIT_INTERVAL_SECS".to_string(),
                "SNIFFERD_CAPTURE_DIR".to_string(),
            ]
        );
    }

    #[test]
    fn test_load_from_file_override() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[capture]\nsplit_interval_secs = 15").unwrap();

        let files = discover_config_files_with_override(Some(&path));
        assert_eq!(files.last(), Some(&path));

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.infra.capture.split_interval_secs, 15);
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = load_from_file(Path::new("/nonexistent/snifferd.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }
}
