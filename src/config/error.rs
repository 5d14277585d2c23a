//! Configuration error types.

use std::fmt;
use std::path::PathBuf;

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    Io { path: PathBuf, error: std::io::Error },
    /// The configuration file is not valid YAML, or doesn't match the
    /// expected shape.
    Yaml { path: PathBuf, error: serde_yml::Error },
    /// Two site entries claim the same port.
    DuplicatePort { port: u16 },
    /// A value parsed fine as YAML but isn't acceptable.
    Invalid { key: &'static str, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, error } => {
                write!(f, "failed to read {}: {}", path.display(), error)
            }
            ConfigError::Yaml { path, error } => {
                write!(f, "failed to parse {}: {}", path.display(), error)
            }
            ConfigError::DuplicatePort { port } => {
                write!(f, "two or more servers configured on port {port}")
            }
            ConfigError::Invalid { key, message } => {
                write!(f, "invalid value for '{key}': {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { error, .. } => Some(error),
            ConfigError::Yaml { error, .. } => Some(error),
            _ => None,
        }
    }
}
