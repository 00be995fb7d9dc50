//! Persisted user preferences.
//!
//! Stored as JSON next to the other service state. Reads never have side
//! effects: a missing or unreadable file yields the defaults, which keep
//! every automatic behavior disabled.

use crate::atomic::write_atomic;
use crate::error::ConfigError;
use crate::session::SessionParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// User preferences
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Start the tunnel when the device finishes booting
    pub auto_start_on_boot: bool,
    /// Re-establish the tunnel when connectivity comes back
    pub reconnect_on_network_change: bool,
    /// Engine config document selected by the user
    pub active_config_path: Option<PathBuf>,
    /// Parameters of the last successful start
    pub last_session: Option<SessionParams>,
}

impl Preferences {
    /// Parameters for an automatic start: the last session if any,
    /// otherwise the defaults, with the active config attached.
    pub fn auto_start_params(&self) -> SessionParams {
        let mut params = self.last_session.clone().unwrap_or_default();
        if params.config_path.is_none() {
            params.config_path = self.active_config_path.clone();
        }
        params
    }
}

/// File-backed preference store.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current preferences; defaults when absent or unreadable.
    pub fn load(&self) -> Preferences {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No preferences at {}, using defaults", self.path.display());
                return Preferences::default();
            }
            Err(e) => {
                warn!("Cannot read preferences {}: {}", self.path.display(), e);
                return Preferences::default();
            }
        };

        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!("Malformed preferences {}: {}", self.path.display(), e);
            Preferences::default()
        })
    }

    pub fn save(&self, preferences: &Preferences) -> Result<(), ConfigError> {
        let json = serde_json::to_vec_pretty(preferences).map_err(|e| ConfigError::Encode {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        write_atomic(&self.path, &json)
    }

    /// Read-modify-write.
    pub fn update(&self, apply: impl FnOnce(&mut Preferences)) -> Result<Preferences, ConfigError> {
        let mut preferences = self.load();
        apply(&mut preferences);
        self.save(&preferences)?;
        Ok(preferences)
    }

    /// The `auto_start_on_boot` flag; false when unset.
    pub fn auto_start_on_boot(&self) -> bool {
        self.load().auto_start_on_boot
    }

    /// The `reconnect_on_network_change` flag; false when unset.
    pub fn reconnect_on_network_change(&self) -> bool {
        self.load().reconnect_on_network_change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_reads_defaults_without_creating() {
        let tmp = TempDir::new().unwrap();
        let store = PreferenceStore::new(tmp.path().join("preferences.json"));

        assert!(!store.auto_start_on_boot());
        assert!(!store.reconnect_on_network_change());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_round_trip_and_partial_file() {
        let tmp = TempDir::new().unwrap();
        let store = PreferenceStore::new(tmp.path().join("preferences.json"));

        store
            .update(|p| {
                p.auto_start_on_boot = true;
                p.last_session = Some(SessionParams::new("203.0.113.5", 443, vec![]));
            })
            .unwrap();
        let loaded = store.load();
        assert!(loaded.auto_start_on_boot);
        assert_eq!(loaded.last_session.unwrap().server_port, 443);

        fs::write(store.path(), r#"{"auto_start_on_boot": true}"#).unwrap();
        let partial = store.load();
        assert!(partial.auto_start_on_boot);
        assert!(partial.last_session.is_none());
    }

    #[test]
    fn test_malformed_file_reads_defaults() {
        let tmp = TempDir::new().unwrap();
        let store = PreferenceStore::new(tmp.path().join("preferences.json"));
        fs::write(store.path(), "{not json").unwrap();

        assert_eq!(store.load(), Preferences::default());
    }

    #[test]
    fn test_auto_start_params_attach_active_config() {
        let preferences = Preferences {
            active_config_path: Some(PathBuf::from("/data/config/config.yaml")),
            ..Preferences::default()
        };
        let params = preferences.auto_start_params();
        assert_eq!(params.server_port, 7897);
        assert_eq!(
            params.config_path,
            Some(PathBuf::from("/data/config/config.yaml"))
        );
    }
}
