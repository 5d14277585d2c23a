//! Site directory: maps a listening port to the site served on it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;

/// An immutable, per-configuration-load site description.
#[derive(Debug, Clone)]
pub struct Site {
    pub name: Arc<str>,
    pub root: Arc<Path>,
    pub port: u16,
}

/// Built once from the loaded configuration and shared read-only across
/// the worker. Looking a site up by port is just a map read; there is
/// nothing to cache beyond that.
#[derive(Debug, Default)]
pub struct SiteDirectory {
    by_port: HashMap<u16, Site>,
}

impl SiteDirectory {
    pub fn from_config(config: &Config) -> Self {
        let mut by_port = HashMap::with_capacity(config.servers.len());
        for site in &config.servers {
            by_port.insert(
                site.port,
                Site {
                    name: Arc::from(site.name.as_str()),
                    root: Arc::from(PathBuf::from(&site.root).as_path()),
                    port: site.port,
                },
            );
        }
        Self { by_port }
    }

    pub fn get(&self, port: u16) -> Option<&Site> {
        self.by_port.get(&port)
    }

    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.by_port.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;

    fn config_with(sites: Vec<(&str, u16, &str)>) -> Config {
        Config {
            ip: "0.0.0.0".into(),
            cpu_cores: 0,
            per_process_max_thread_count: 0,
            per_process_max_events: 0,
            servers: sites
                .into_iter()
                .map(|(name, port, root)| SiteConfig {
                    name: name.into(),
                    port,
                    root: root.into(),
                    locations: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn looks_up_by_port() {
        let config = config_with(vec![("a", 8081, "/var/www/a"), ("b", 8082, "/var/www/b")]);
        let dir = SiteDirectory::from_config(&config);
        assert_eq!(dir.get(8081).unwrap().name.as_ref(), "a");
        assert_eq!(dir.get(8082).unwrap().root.as_ref(), Path::new("/var/www/b"));
        assert!(dir.get(9999).is_none());
    }

    #[test]
    fn ports_lists_every_configured_port() {
        let config = config_with(vec![("a", 8081, "/x"), ("b", 8082, "/y")]);
        let dir = SiteDirectory::from_config(&config);
        let mut ports: Vec<u16> = dir.ports().collect();
        ports.sort();
        assert_eq!(ports, vec![8081, 8082]);
    }
}
