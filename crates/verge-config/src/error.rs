use std::io;
use std::path::PathBuf;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("Invalid settings file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Failed to encode {}: {message}", path.display())]
    Encode { path: PathBuf, message: String },
}
