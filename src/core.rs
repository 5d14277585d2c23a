//! Per-connection state and the handler result type.
//!
//! Consolidates what the original kept as three parallel maps
//! (`client_port`, `busy`, TLS sessions) into one owning record per
//! DESIGN NOTES §9, eliminating the lock-order hazard between them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::sniffer::Protocol;
use crate::tls::TlsSession;

/// What a protocol handler decided to do with a connection after one
/// invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Close the descriptor, free its resources, evict its state.
    Terminal,
    /// Leave the descriptor registered for another request.
    KeepAlive,
}

/// Per-descriptor state, addressed by file descriptor in the reactor's
/// registration table. Created on `accept`, destroyed atomically with
/// `close` and deregistration.
pub struct ConnectionRecord {
    /// Copied from the listening endpoint at accept time; never changes.
    pub port: u16,
    /// Set exactly once, on the connection's first service.
    pub protocol: Mutex<Option<Protocol>>,
    /// Present iff the connection was classified as TLS. Owned here so
    /// that clearing it is the single place a session is ever freed.
    pub tls: Mutex<Option<TlsSession>>,
    /// True while a task is executing on this descriptor. The reactor
    /// must never enqueue a second task while this is set.
    pub busy: AtomicBool,
}

impl ConnectionRecord {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            protocol: Mutex::new(None),
            tls: Mutex::new(None),
            busy: AtomicBool::new(false),
        }
    }

    /// Try to claim this record for a task. Returns `false` if another
    /// task already holds it.
    pub fn try_claim(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the claim after a `KeepAlive` outcome.
    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// Drop and half-close any TLS session. Called on every `Terminal`
    /// path before deregistration and `close(fd)`.
    pub fn take_tls(&self) -> Option<TlsSession> {
        self.tls.lock().unwrap().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_claim_succeeds_at_a_time() {
        let record = ConnectionRecord::new(8081);
        assert!(record.try_claim());
        assert!(!record.try_claim());
        record.release();
        assert!(record.try_claim());
    }

    #[test]
    fn take_tls_clears_the_slot() {
        let record = ConnectionRecord::new(8081);
        assert!(record.take_tls().is_none());
    }
}
