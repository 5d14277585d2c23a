//! Worker process entry point: binds listeners, loads TLS materials,
//! and runs the reactor until killed.

use std::net::TcpListener as StdTcpListener;
use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};

use crate::cache::FileCache;
use crate::config::Config;
use crate::error::StartupError;
use crate::listener;
use crate::reactor::Reactor;
use crate::site::SiteDirectory;
use crate::tls;

/// 50 MiB, the file cache's default resident-byte budget (§3).
const CACHE_BUDGET: u64 = 50 * 1024 * 1024;

const CERT_PATH: &str = "server.crt";
const KEY_PATH: &str = "server.key";

/// Runs inside a freshly forked child. Never returns under normal
/// operation; any startup error is fatal for this worker.
pub fn run(config: &Config) -> Result<(), StartupError> {
    ignore_sigpipe();

    let sites = Arc::new(SiteDirectory::from_config(config));
    let cache = Arc::new(FileCache::with_budget(CACHE_BUDGET));

    let mut bound = Vec::with_capacity(config.servers.len());
    for port in config.ports() {
        let listener = bind(port)?;
        bound.push((listener, port));
    }

    let tls_config = load_tls_if_present()?;
    if tls_config.is_some() {
        info!("TLS materials loaded; worker will serve both HTTP and HTTPS");
    } else {
        info!("no TLS materials found ({CERT_PATH}/{KEY_PATH}); worker will serve HTTP only");
    }

    let mut reactor = Reactor::new(
        bound,
        config.thread_pool_size(),
        config.max_events(),
        sites,
        cache,
        tls_config,
    )
    .map_err(StartupError::Reactor)?;

    info!(pid = std::process::id(), "worker entering event loop");
    if let Err(e) = reactor.run() {
        error!(error = %e, "reactor exited with an error");
    }
    Ok(())
}

fn bind(port: u16) -> Result<StdTcpListener, StartupError> {
    listener::bind_reuse_port(port).map_err(|source| StartupError::Listener { port, source })
}

fn load_tls_if_present() -> Result<Option<Arc<rustls::ServerConfig>>, StartupError> {
    let cert = Path::new(CERT_PATH);
    let key = Path::new(KEY_PATH);
    if !cert.exists() || !key.exists() {
        return Ok(None);
    }
    tls::load_server_config(cert, key)
        .map(Some)
        .map_err(|source| StartupError::Tls { cert: cert.to_path_buf(), key: key.to_path_buf(), source })
}

fn ignore_sigpipe() {
    // SAFETY: installing SIG_IGN for SIGPIPE is async-signal-safe and has
    // no aliasing/ownership concerns; every write path additionally
    // checks for EPIPE explicitly (§4.6/§4.7).
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
