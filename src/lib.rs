//! sokd -- a multi-site HTTP/HTTPS origin server.
//!
//! A single executable binds a configured set of TCP listening ports,
//! forks a pool of worker processes, and, within each worker,
//! multiplexes client connections using a readiness-based I/O reactor.
//! Each accepted connection is sniffed to identify plaintext HTTP or
//! TLS, handed to the appropriate protocol handler, served against a
//! per-site document root through an in-memory file cache, and either
//! closed or retained for HTTP keep-alive.
//!
//! # Layout
//!
//! - [`supervisor`] -- pre-fork, SIGCHLD reaping, operator commands.
//! - [`worker`] -- per-worker startup: listeners, TLS materials, reactor.
//! - [`reactor`] -- the readiness loop and connection dispatch.
//! - [`sniffer`] -- first-bytes protocol classification.
//! - [`http`] / [`https`] -- the two protocol handlers.
//! - [`cache`] -- the bounded, content-addressed file cache.
//! - [`site`] -- port-to-site lookup.
//! - [`config`] -- `config.yaml` loading.

pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod http;
pub mod https;
pub mod listener;
pub mod logging;
pub mod pool;
pub mod reactor;
pub mod site;
pub mod sniffer;
pub mod supervisor;
pub mod tls;
pub mod worker;

pub use config::Config;
