//! Top-level error types for the server binary.

use std::path::PathBuf;

use crate::config::ConfigError;

/// Fatal startup errors. Any of these keeps a worker from ever entering
/// its event loop.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind listener on port {port}: {source}")]
    Listener { port: u16, #[source] source: std::io::Error },

    #[error("failed to load TLS materials from {cert:?} / {key:?}: {source}")]
    Tls { cert: PathBuf, key: PathBuf, #[source] source: anyhow::Error },

    #[error("failed to create event queue: {0}")]
    Reactor(#[source] std::io::Error),
}
