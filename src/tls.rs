//! TLS context factory and per-connection session handling.
//!
//! Loads `server.crt` / `server.key` once per worker into a shared
//! `rustls::ServerConfig`, and wraps the re-entrant handshake/read/write
//! primitives the HTTPS handler drives across reactor wakeups.

use std::io;
use std::path::Path;
use std::sync::Arc;

use rustls::ServerConnection;

/// Outcome of driving a TLS session forward by one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsStep {
    Done,
    WantRead,
    WantWrite,
    Error,
}

/// Loads the server certificate and private key and builds the shared,
/// `Arc`-wrapped TLS server configuration every connection's session is
/// started from. Called once per worker; a key/cert mismatch is fatal.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> anyhow::Result<Arc<rustls::ServerConfig>> {
    // rustls 0.23 looks up a process-wide crypto provider; install ring
    // if nothing has claimed the slot yet (a second worker racing this
    // during its own startup is fine, `install_default` just loses).
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cert_file = std::fs::File::open(cert_path)
        .map_err(|e| anyhow::anyhow!("opening {}: {e}", cert_path.display()))?;
    let mut cert_reader = io::BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("parsing {}: {e}", cert_path.display()))?;
    if certs.is_empty() {
        anyhow::bail!("{} contains no certificates", cert_path.display());
    }

    let key_file = std::fs::File::open(key_path)
        .map_err(|e| anyhow::anyhow!("opening {}: {e}", key_path.display()))?;
    let mut key_reader = io::BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| anyhow::anyhow!("parsing {}: {e}", key_path.display()))?
        .ok_or_else(|| anyhow::anyhow!("{} contains no private key", key_path.display()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| anyhow::anyhow!("certificate/key mismatch: {e}"))?;

    Ok(Arc::new(config))
}

/// Owns one connection's TLS state. The session is created lazily on the
/// first invocation for a descriptor and destroyed exactly once, when the
/// owning `ConnectionRecord` is torn down (see `core::ConnectionRecord`).
pub struct TlsSession {
    pub conn: ServerConnection,
}

impl TlsSession {
    pub fn new(config: Arc<rustls::ServerConfig>) -> io::Result<Self> {
        let conn = ServerConnection::new(config)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(Self { conn })
    }

    /// Drive the handshake forward by reading any pending TLS records off
    /// `stream` and feeding the rustls state machine. Non-blocking: a
    /// `WouldBlock` from the socket read becomes `TlsStep::WantRead`.
    pub fn advance_handshake<S: io::Read + io::Write>(&mut self, stream: &mut S) -> TlsStep {
        if !self.conn.is_handshaking() {
            return TlsStep::Done;
        }

        loop {
            if self.conn.wants_write() {
                match self.conn.write_tls(stream) {
                    Ok(0) => return TlsStep::Error,
                    Ok(_) => continue,
                    Err(e) if would_block(&e) => return TlsStep::WantWrite,
                    Err(_) => return TlsStep::Error,
                }
            }
            if self.conn.wants_read() {
                match self.conn.read_tls(stream) {
                    Ok(0) => return TlsStep::Error,
                    Ok(_) => match self.conn.process_new_packets() {
                        Ok(_) => {
                            if !self.conn.is_handshaking() {
                                return TlsStep::Done;
                            }
                            continue;
                        }
                        Err(_) => return TlsStep::Error,
                    },
                    Err(e) if would_block(&e) => return TlsStep::WantRead,
                    Err(_) => return TlsStep::Error,
                }
            }
            return TlsStep::Done;
        }
    }

    /// Read plaintext application data into `buf`. Returns `Ok(0)` on a
    /// clean peer shutdown with nothing left buffered, propagates a
    /// transient `WouldBlock` as an `io::Error` for the caller to treat as
    /// a yield.
    ///
    /// Always drains `conn.reader()` before deciding, even when
    /// `read_tls` itself returns `WouldBlock`: a client that coalesces its
    /// final handshake flight with its first request in one TCP segment
    /// leaves that request's bytes already decrypted into rustls's
    /// plaintext buffer by `advance_handshake`'s own
    /// `process_new_packets` call, with nothing left on the socket to
    /// read. Skipping the drain here would stall the connection forever
    /// waiting on a readiness edge that will never fire again.
    pub fn read_plaintext<S: io::Read + io::Write>(
        &mut self,
        stream: &mut S,
        buf: &mut Vec<u8>,
    ) -> io::Result<usize> {
        let closed = match self.conn.read_tls(stream) {
            Ok(0) => true,
            Ok(_) => {
                if let Err(e) = self.conn.process_new_packets() {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e));
                }
                false
            }
            Err(e) if would_block(&e) => false,
            Err(e) => return Err(e),
        };

        let mut chunk = [0u8; 4096];
        let mut total = 0;
        loop {
            match self.conn.reader().read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        if total > 0 {
            Ok(total)
        } else if closed {
            Ok(0)
        } else {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "no plaintext available yet"))
        }
    }

    /// Queue `data` as plaintext and flush every resulting TLS record to
    /// `stream`. A `WouldBlock` mid-flush is surfaced to the caller so it
    /// can treat the write as a transient yield.
    pub fn write_plaintext<S: io::Read + io::Write>(
        &mut self,
        stream: &mut S,
        data: &[u8],
    ) -> io::Result<()> {
        use std::io::Write as _;
        self.conn.writer().write_all(data)?;
        self.flush(stream)
    }

    fn flush<S: io::Read + io::Write>(&mut self, stream: &mut S) -> io::Result<()> {
        while self.conn.wants_write() {
            match self.conn.write_tls(stream) {
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Half-close the session. Best-effort: errors are ignored since the
    /// descriptor is being torn down regardless.
    pub fn shutdown<S: io::Read + io::Write>(&mut self, stream: &mut S) {
        self.conn.send_close_notify();
        let _ = self.flush(stream);
    }
}

fn would_block(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock)
}
