//! Configuration loading for sokd.
//!
//! The whole server is described by one YAML file (`config.yaml` by
//! default). There is no environment-variable layer and no partial
//! overrides: `Config::load` reads the file once, at supervisor startup,
//! and again whenever the operator issues a `restart` command.
//!
//! # Example
//!
//! ```yaml
//! ip: 0.0.0.0
//! cpu_cores: 4
//! per_process_max_thread_count: 16
//! per_process_max_events: 1024
//! servers:
//!   - name: default
//!     port: 8081
//!     root: /var/www/html
//! ```

mod error;

pub use error::ConfigError;

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Task-pool size used when `per_process_max_thread_count` is absent or zero.
const DEFAULT_THREAD_COUNT: usize = 16;
/// Event-queue batch size used when `per_process_max_events` is absent or zero.
const DEFAULT_MAX_EVENTS: usize = 1024;

/// One entry of the `servers` list.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub port: u16,
    pub root: PathBuf,
    /// Reserved for future reverse-proxy target lists. Parsed and carried
    /// along but never consulted by request handling.
    #[serde(default)]
    pub locations: Vec<serde_yml::Value>,
}

/// Top-level configuration, as deserialized directly from `config.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub ip: String,
    #[serde(default)]
    pub cpu_cores: usize,
    #[serde(default)]
    pub per_process_max_thread_count: usize,
    #[serde(default)]
    pub per_process_max_events: usize,
    pub servers: Vec<SiteConfig>,
}

impl Config {
    /// Load and validate configuration from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        let config: Config = serde_yml::from_str(&raw).map_err(|error| ConfigError::Yaml {
            path: path.to_path_buf(),
            error,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.port == 0 {
                return Err(ConfigError::Invalid {
                    key: "servers[].port",
                    message: format!("site {:?} has no usable port (0)", server.name),
                });
            }
            if server.name.is_empty() {
                return Err(ConfigError::Invalid {
                    key: "servers[].name",
                    message: format!("site on port {} has an empty name", server.port),
                });
            }
            if !seen.insert(server.port) {
                return Err(ConfigError::DuplicatePort { port: server.port });
            }
        }
        Ok(())
    }

    /// Number of worker processes to pre-fork: the configured value if
    /// positive, else host concurrency.
    pub fn worker_count(&self) -> usize {
        if self.cpu_cores > 0 {
            self.cpu_cores
        } else {
            num_cpus::get()
        }
    }

    /// Per-worker task-pool size.
    pub fn thread_pool_size(&self) -> usize {
        if self.per_process_max_thread_count > 0 {
            self.per_process_max_thread_count
        } else {
            DEFAULT_THREAD_COUNT
        }
    }

    /// Per-worker event-queue batch size.
    pub fn max_events(&self) -> usize {
        if self.per_process_max_events > 0 {
            self.per_process_max_events
        } else {
            DEFAULT_MAX_EVENTS
        }
    }

    /// Every port a worker must listen on.
    pub fn ports(&self) -> Vec<u16> {
        self.servers.iter().map(|s| s.port).collect()
    }

    pub fn log_summary(&self) {
        tracing::info!(
            ip = %self.ip,
            workers = self.worker_count(),
            threads_per_worker = self.thread_pool_size(),
            max_events = self.max_events(),
            sites = self.servers.len(),
            "configuration loaded"
        );
        for site in &self.servers {
            tracing::info!(site = %site.name, port = site.port, root = %site.root.display(), "site configured");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_minimal_config() {
        let file = write_config(
            r#"
ip: 0.0.0.0
servers:
  - name: default
    port: 8081
    root: /var/www/html
"#,
        );
        let config = Config::load(file.path()).expect("should load");
        assert_eq!(config.ip, "0.0.0.0");
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].port, 8081);
        assert!(config.worker_count() >= 1);
        assert_eq!(config.thread_pool_size(), DEFAULT_THREAD_COUNT);
        assert_eq!(config.max_events(), DEFAULT_MAX_EVENTS);
    }

    #[test]
    fn honors_explicit_worker_count() {
        let file = write_config(
            r#"
ip: 0.0.0.0
cpu_cores: 3
per_process_max_thread_count: 8
per_process_max_events: 256
servers:
  - name: default
    port: 8081
    root: /var/www/html
"#,
        );
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.thread_pool_size(), 8);
        assert_eq!(config.max_events(), 256);
    }

    #[test]
    fn rejects_duplicate_ports() {
        let file = write_config(
            r#"
ip: 0.0.0.0
servers:
  - name: a
    port: 8081
    root: /var/www/a
  - name: b
    port: 8081
    root: /var/www/b
"#,
        );
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePort { port: 8081 }));
    }

    #[test]
    fn rejects_port_zero() {
        let file = write_config(
            r#"
ip: 0.0.0.0
servers:
  - name: a
    port: 0
    root: /var/www/a
"#,
        );
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "servers[].port", .. }));
    }

    #[test]
    fn rejects_empty_site_name() {
        let file = write_config(
            r#"
ip: 0.0.0.0
servers:
  - name: ""
    port: 8081
    root: /var/www/a
"#,
        );
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "servers[].name", .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = Config::load("/nonexistent/config.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn malformed_yaml_is_a_yaml_error() {
        let file = write_config("not: [valid, yaml: structure");
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }
}
