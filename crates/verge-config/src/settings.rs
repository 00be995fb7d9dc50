//! Service settings and on-disk layout.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest accepted per-file log cap.
pub const MIN_LOG_FILE_BYTES: u64 = 64 * 1024;

/// Tuning for the session controller, read from `verge.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Upper bound for each engine start/stop/load signal (seconds)
    pub engine_timeout_secs: u64,
    /// Traffic poll period while the tunnel is up (milliseconds)
    pub traffic_poll_interval_ms: u64,
    /// Host the control API is dialed on when the config binds a wildcard
    pub controller_host: String,
    /// Soft cap per diagnostic log file
    pub log_max_file_bytes: u64,
    /// Diagnostic log files kept by the retention sweep
    pub log_max_files: usize,
    /// Our own package, excluded from tunnel routing
    pub package_name: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            engine_timeout_secs: 5,
            traffic_poll_interval_ms: 1000,
            controller_host: "127.0.0.1".to_string(),
            log_max_file_bytes: 10 * 1024 * 1024, // 10 MiB
            log_max_files: 7,
            package_name: "io.github.clashverge.mobile".to_string(),
        }
    }
}

impl ServiceSettings {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let settings: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        settings.validate(path)?;
        Ok(settings)
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |message: &str| ConfigError::Parse {
            path: path.to_path_buf(),
            message: message.to_string(),
        };
        if self.engine_timeout_secs == 0 {
            return Err(invalid("engine_timeout_secs must be at least 1"));
        }
        if self.traffic_poll_interval_ms < 100 {
            return Err(invalid("traffic_poll_interval_ms must be at least 100"));
        }
        if self.log_max_file_bytes < MIN_LOG_FILE_BYTES {
            return Err(invalid("log_max_file_bytes must be at least 65536"));
        }
        if self.log_max_files == 0 {
            return Err(invalid("log_max_files must be at least 1"));
        }
        Ok(())
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn traffic_poll_interval(&self) -> Duration {
        Duration::from_millis(self.traffic_poll_interval_ms)
    }
}

/// Files and directories under one base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePaths {
    pub base: PathBuf,
}

impl ServicePaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    pub fn default_config(&self) -> PathBuf {
        self.base.join("config").join("config.yaml")
    }

    pub fn preferences(&self) -> PathBuf {
        self.base.join("preferences.json")
    }

    pub fn settings(&self) -> PathBuf {
        self.base.join("verge.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_settings_use_defaults() {
        let tmp = TempDir::new().unwrap();
        let settings = ServiceSettings::load(&tmp.path().join("verge.toml")).unwrap();
        assert_eq!(settings, ServiceSettings::default());
        assert_eq!(settings.engine_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_settings_override() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("verge.toml");
        fs::write(&path, "engine_timeout_secs = 2\nlog_max_files = 3\n").unwrap();

        let settings = ServiceSettings::load(&path).unwrap();
        assert_eq!(settings.engine_timeout_secs, 2);
        assert_eq!(settings.log_max_files, 3);
        assert_eq!(settings.traffic_poll_interval_ms, 1000);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("verge.toml");

        fs::write(&path, "engine_timeout_secs = \"soon\"\n").unwrap();
        assert!(matches!(ServiceSettings::load(&path), Err(ConfigError::Parse { .. })));

        fs::write(&path, "engine_timeout_secs = 0\n").unwrap();
        assert!(matches!(ServiceSettings::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_tiny_log_cap_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("verge.toml");

        fs::write(&path, "log_max_file_bytes = 1\n").unwrap();
        assert!(matches!(ServiceSettings::load(&path), Err(ConfigError::Parse { .. })));

        fs::write(&path, format!("log_max_file_bytes = {MIN_LOG_FILE_BYTES}\n")).unwrap();
        let settings = ServiceSettings::load(&path).unwrap();
        assert_eq!(settings.log_max_file_bytes, MIN_LOG_FILE_BYTES);
    }

    #[test]
    fn test_paths_layout() {
        let paths = ServicePaths::new("/data/verge");
        assert_eq!(paths.logs_dir(), PathBuf::from("/data/verge/logs"));
        assert_eq!(paths.default_config(), PathBuf::from("/data/verge/config/config.yaml"));
        assert_eq!(paths.preferences(), PathBuf::from("/data/verge/preferences.json"));
    }
}
