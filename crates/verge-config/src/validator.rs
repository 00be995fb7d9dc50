//! Engine config document checks and repair.
//!
//! The proxy engine refuses to expose its control API without an
//! `external-controller` directive, and the session controller cannot
//! load configs or poll traffic without that API. Before a file-backed
//! start the document is checked and, if needed, repaired by prepending
//! a default directive block. User content is never removed, reordered
//! or rewritten.

use crate::error::ConfigError;
use crate::atomic::write_atomic;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// The control-API directive key (matched case-insensitively).
pub const CONTROL_DIRECTIVE: &str = "external-controller:";

/// The control-API bearer secret key (top level, matched case-insensitively).
pub const SECRET_DIRECTIVE: &str = "secret:";

pub const DEFAULT_CONTROL_HOST: &str = "127.0.0.1";
pub const DEFAULT_CONTROL_PORT: u16 = 9090;

/// Block prepended to documents lacking the control directive.
pub const INJECTED_HEADER: &str = "# Auto-injected by Clash Verge Rev\n\
external-controller: 127.0.0.1:9090\n\
secret: \"\"\n";

/// Field names reported by [`ConfigValidator::check_required_fields`].
pub const REQUIRED_FIELDS: [&str; 5] = [
    "external-controller",
    "mixed-port",
    "proxies",
    "proxy-groups",
    "rules",
];

/// Document written when the active config path does not exist yet.
pub const DEFAULT_CONFIG: &str = "# Clash Verge Rev default config
mixed-port: 7897
allow-lan: false
mode: rule
log-level: info
ipv6: true
external-controller: 127.0.0.1:9090
secret: \"\"

dns:
  enable: true
  listen: 0.0.0.0:1053
  enhanced-mode: fake-ip
  nameserver:
    - 8.8.8.8
    - 1.1.1.1

proxies:
  - name: \"DIRECT\"
    type: direct

proxy-groups:
  - name: \"PROXY\"
    type: select
    proxies:
      - DIRECT

rules:
  - MATCH,PROXY
";

/// Host and port of the engine's control API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlAddress {
    pub host: String,
    pub port: u16,
}

impl ControlAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Whether the directive binds every interface rather than one host.
    pub fn is_wildcard(&self) -> bool {
        matches!(self.host.as_str(), "" | "0.0.0.0" | "::" | "[::]")
    }

    /// Host to dial: wildcard or empty bind hosts map to loopback.
    pub fn connect_host(&self) -> &str {
        if self.is_wildcard() {
            DEFAULT_CONTROL_HOST
        } else {
            &self.host
        }
    }
}

impl Default for ControlAddress {
    fn default() -> Self {
        Self::new(DEFAULT_CONTROL_HOST, DEFAULT_CONTROL_PORT)
    }
}

impl fmt::Display for ControlAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Presence of each required field. Derived, never persisted.
///
/// Empty when the document could not be read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPresence(BTreeMap<String, bool>);

impl FieldPresence {
    pub fn get(&self, field: &str) -> Option<bool> {
        self.0.get(field).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True only for a readable document with every field present.
    pub fn all_present(&self) -> bool {
        !self.0.is_empty() && self.0.values().all(|present| *present)
    }

    pub fn missing(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, present)| !**present)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(name, present)| (name.as_str(), *present))
    }
}

/// An engine config document: path plus text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDocument {
    pub path: PathBuf,
    pub content: String,
}

impl ConfigDocument {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Read a document from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Self::new(path, content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ConfigError::NotFound(path.to_path_buf()))
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Whether a non-comment line carries the control directive.
    pub fn has_control_directive(&self) -> bool {
        self.content.lines().any(|line| {
            let trimmed = line.trim_start();
            !trimmed.starts_with('#') && trimmed.to_ascii_lowercase().contains(CONTROL_DIRECTIVE)
        })
    }

    /// Text with [`INJECTED_HEADER`] prepended, or `None` if the
    /// directive is already present.
    pub fn repaired_content(&self) -> Option<String> {
        if self.has_control_directive() {
            return None;
        }
        let mut fixed = String::with_capacity(INJECTED_HEADER.len() + self.content.len());
        fixed.push_str(INJECTED_HEADER);
        fixed.push_str(&self.content);
        Some(fixed)
    }

    pub fn required_fields(&self) -> FieldPresence {
        let mut fields = BTreeMap::new();
        fields.insert(REQUIRED_FIELDS[0].to_string(), self.has_control_directive());
        fields.insert(
            REQUIRED_FIELDS[1].to_string(),
            self.has_top_level_key("mixed-port:") || self.has_top_level_key("port:"),
        );
        fields.insert(REQUIRED_FIELDS[2].to_string(), self.has_top_level_key("proxies:"));
        fields.insert(REQUIRED_FIELDS[3].to_string(), self.has_top_level_key("proxy-groups:"));
        fields.insert(REQUIRED_FIELDS[4].to_string(), self.has_top_level_key("rules:"));
        FieldPresence(fields)
    }

    /// Control API address from the first directive line, or the default
    /// when the directive is absent or unparsable.
    pub fn control_address(&self) -> ControlAddress {
        for line in self.content.lines() {
            let trimmed = line.trim();
            if !trimmed.to_ascii_lowercase().starts_with(CONTROL_DIRECTIVE) {
                continue;
            }

            let value = directive_value(&trimmed[CONTROL_DIRECTIVE.len()..]);

            return match value.rsplit_once(':') {
                Some((host, port)) => match port.trim().parse::<u16>() {
                    Ok(port) => ControlAddress::new(host.trim(), port),
                    Err(_) => ControlAddress::default(),
                },
                None => ControlAddress::default(),
            };
        }
        ControlAddress::default()
    }

    pub fn control_port(&self) -> u16 {
        self.control_address().port
    }

    /// Control API secret from the top-level `secret:` line; empty when
    /// absent.
    pub fn control_secret(&self) -> String {
        self.content
            .lines()
            .filter(|line| !line.starts_with(|c: char| c.is_whitespace()))
            .find(|line| line.to_ascii_lowercase().starts_with(SECRET_DIRECTIVE))
            .map(|line| directive_value(&line[SECRET_DIRECTIVE.len()..]).to_string())
            .unwrap_or_default()
    }

    /// Top-level YAML keys start at column zero.
    fn has_top_level_key(&self, key: &str) -> bool {
        self.content.lines().any(|line| {
            !line.starts_with(|c: char| c.is_whitespace())
                && line.to_ascii_lowercase().starts_with(key)
        })
    }
}

/// Directive value with a trailing comment and surrounding quotes removed.
fn directive_value(raw: &str) -> &str {
    raw.split(" #")
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'')
}

/// Path-level operations over engine config documents.
///
/// All operations tolerate a missing file by returning a safe default;
/// only [`ConfigValidator::validate_and_fix`] and
/// [`ConfigValidator::ensure_default`] write.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Make sure the document carries the control directive.
    ///
    /// Returns true when the document is valid, possibly after the
    /// default block was prepended and written back to the same path.
    /// Returns false when the file is missing, unreadable or could not
    /// be rewritten.
    pub fn validate_and_fix(path: &Path) -> bool {
        let document = match ConfigDocument::load(path) {
            Ok(document) => document,
            Err(e) => {
                error!("Config validation failed: {}", e);
                return false;
            }
        };

        let Some(fixed) = document.repaired_content() else {
            info!("Config already has external-controller: {}", path.display());
            return true;
        };

        warn!("Config missing external-controller, injecting default: {}", path.display());
        match write_atomic(path, fixed.as_bytes()) {
            Ok(()) => {
                info!("Added external-controller to {}", path.display());
                true
            }
            Err(e) => {
                error!("Failed to persist repaired config: {}", e);
                false
            }
        }
    }

    /// Presence of each required field; empty if the file is unreadable.
    pub fn check_required_fields(path: &Path) -> FieldPresence {
        match ConfigDocument::load(path) {
            Ok(document) => document.required_fields(),
            Err(e) => {
                warn!("Cannot check config fields: {}", e);
                FieldPresence::default()
            }
        }
    }

    /// Control API port, defaulting to 9090.
    pub fn extract_control_port(path: &Path) -> u16 {
        Self::extract_control_address(path).port
    }

    /// Control API address, defaulting to `127.0.0.1:9090`.
    pub fn extract_control_address(path: &Path) -> ControlAddress {
        ConfigDocument::load(path)
            .map(|document| document.control_address())
            .unwrap_or_default()
    }

    /// Control API secret; empty when absent or unreadable.
    pub fn extract_control_secret(path: &Path) -> String {
        ConfigDocument::load(path)
            .map(|document| document.control_secret())
            .unwrap_or_default()
    }

    /// Write [`DEFAULT_CONFIG`] if nothing exists at `path`.
    ///
    /// Returns whether a new document was created.
    pub fn ensure_default(path: &Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        write_atomic(path, DEFAULT_CONFIG.as_bytes())?;
        info!("Created default config at {}", path.display());
        Ok(true)
    }
}
