//! The readiness loop: one per worker, running on its own thread.
//!
//! Owns the mapping from descriptor (`mio::Token`) to connection state
//! and dispatches ready descriptors onto the worker's task pool,
//! without ever handing the same descriptor to two tasks at once.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use tracing::{error, info, warn};

use crate::cache::FileCache;
use crate::core::{ConnectionRecord, Outcome};
use crate::pool::TaskPool;
use crate::site::SiteDirectory;
use crate::sniffer::{self, Protocol};

struct Connection {
    stream: Mutex<TcpStream>,
    record: ConnectionRecord,
}

/// Everything a worker's reactor needs, built once at worker startup and
/// shared read-only (behind `Arc`) with every dispatched task.
pub struct Reactor {
    poll: Poll,
    listeners: HashMap<Token, (TcpListener, u16)>,
    connections: Arc<Mutex<HashMap<Token, Arc<Connection>>>>,
    next_token: AtomicUsize,
    pool: TaskPool,
    sites: Arc<SiteDirectory>,
    cache: Arc<FileCache>,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    max_events: usize,
}

impl Reactor {
    pub fn new(
        bound: Vec<(std::net::TcpListener, u16)>,
        thread_pool_size: usize,
        max_events: usize,
        sites: Arc<SiteDirectory>,
        cache: Arc<FileCache>,
        tls_config: Option<Arc<rustls::ServerConfig>>,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listeners = HashMap::new();

        for (idx, (std_listener, port)) in bound.into_iter().enumerate() {
            let mut listener = TcpListener::from_std(std_listener);
            let token = Token(idx);
            poll.registry().register(&mut listener, token, Interest::READABLE)?;
            listeners.insert(token, (listener, port));
        }

        let next_token = AtomicUsize::new(listeners.len());

        Ok(Self {
            poll,
            listeners,
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_token,
            pool: TaskPool::new(thread_pool_size),
            sites,
            cache,
            tls_config,
            max_events,
        })
    }

    /// Run forever. Returns only on an unrecoverable error from the
    /// event queue itself; per-connection errors are handled internally.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(self.max_events);
        loop {
            self.poll.poll(&mut events, None)?;
            for event in events.iter() {
                let token = event.token();
                if self.listeners.contains_key(&token) {
                    self.accept_all(token);
                } else {
                    self.dispatch(token);
                }
            }
        }
    }

    fn accept_all(&mut self, token: Token) {
        let port = match self.listeners.get(&token) {
            Some((_, port)) => *port,
            None => return,
        };
        loop {
            let accepted = match self.listeners.get_mut(&token) {
                Some((listener, _)) => listener.accept(),
                None => return,
            };
            match accepted {
                Ok((mut stream, _addr)) => {
                    let conn_token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
                    if let Err(e) = self.poll.registry().register(&mut stream, conn_token, Interest::READABLE) {
                        warn!(error = %e, "failed to register accepted connection");
                        continue;
                    }
                    let conn = Arc::new(Connection {
                        stream: Mutex::new(stream),
                        record: ConnectionRecord::new(port),
                    });
                    self.connections.lock().unwrap().insert(conn_token, conn);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, port, "accept failed");
                    break;
                }
            }
        }
    }

    fn dispatch(&self, token: Token) {
        let conn = {
            let map = self.connections.lock().unwrap();
            map.get(&token).cloned()
        };
        let Some(conn) = conn else { return };
        if !conn.record.try_claim() {
            return;
        }

        let registry = clone_registry(self.poll.registry());
        let connections = Arc::clone(&self.connections);
        let sites = Arc::clone(&self.sites);
        let cache = Arc::clone(&self.cache);
        let tls_config = self.tls_config.clone();

        self.pool.execute(move || {
            let outcome = {
                let mut stream = conn.stream.lock().unwrap();
                run_protocol(&mut stream, &conn.record, &sites, &cache, tls_config.as_ref())
            };

            match outcome {
                Outcome::KeepAlive => conn.record.release(),
                Outcome::Terminal => {
                    let mut stream = conn.stream.lock().unwrap();
                    if let Some(registry) = &registry {
                        let _ = registry.deregister(&mut *stream);
                    }
                    drop(stream);
                    connections.lock().unwrap().remove(&token);
                    // `conn`'s last `Arc` reference is dropped here (or
                    // shortly after, once this closure returns), closing
                    // the underlying fd.
                }
            }
        });
    }
}

/// `mio::Registry` isn't `Clone`, but every operation we need
/// (`deregister`) only needs a borrow of the same underlying epoll fd;
/// `try_clone` on the OS descriptor gives each task an independent
/// handle to it.
fn clone_registry(registry: &Registry) -> Option<Registry> {
    registry.try_clone().ok()
}

fn run_protocol(
    stream: &mut TcpStream,
    record: &ConnectionRecord,
    sites: &SiteDirectory,
    cache: &FileCache,
    tls_config: Option<&Arc<rustls::ServerConfig>>,
) -> Outcome {
    let protocol = match classify(stream, record) {
        Some(p) => p,
        None => return Outcome::Terminal,
    };

    let site = match sites.get(record.port) {
        Some(site) => site,
        None => {
            error!(port = record.port, "no site configured for port");
            return Outcome::Terminal;
        }
    };

    match protocol {
        Protocol::Http => crate::http::serve(stream, site, cache),
        Protocol::Tls => match tls_config {
            Some(cfg) => crate::https::serve(stream, record, site, cache, cfg),
            None => {
                warn!(port = record.port, "TLS connection on a worker without TLS materials loaded");
                Outcome::Terminal
            }
        },
        Protocol::Closed | Protocol::Unknown => Outcome::Terminal,
    }
}

/// Sniff exactly once per descriptor; every later invocation reuses the
/// cached classification.
fn classify(stream: &TcpStream, record: &ConnectionRecord) -> Option<Protocol> {
    let mut slot = record.protocol.lock().unwrap();
    if let Some(p) = *slot {
        return Some(p);
    }
    let protocol = match sniffer::peek(stream) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "peek failed during protocol sniff");
            return None;
        }
    };
    match protocol {
        Protocol::Closed => {
            info!("peer closed before sending any bytes");
            None
        }
        Protocol::Unknown => {
            warn!("unrecognized protocol on first bytes; closing");
            None
        }
        classified => {
            *slot = Some(classified);
            Some(classified)
        }
    }
}
