//! TLS handler: re-entrant handshake, request parsing shared with the
//! plaintext path, and a zero-copy `mmap`-backed response write.

use std::fs::File;
use std::io;
use std::sync::Arc;

use memmap2::Mmap;
use mio::net::TcpStream;

use crate::cache::{FileCache, Lookup};
use crate::core::{ConnectionRecord, Outcome};
use crate::http::{build_headers, contains_header_terminator, parse_request, resolve_path, wants_keep_alive};
use crate::site::Site;
use crate::tls::{TlsSession, TlsStep};

/// Serve exactly one step of a TLS connection: either advance a pending
/// handshake, or (once the handshake is done) read and answer one
/// request. Re-entered on every reactor wakeup for this descriptor.
pub fn serve(
    stream: &mut TcpStream,
    record: &ConnectionRecord,
    site: &Site,
    cache: &FileCache,
    tls_config: &Arc<rustls::ServerConfig>,
) -> Outcome {
    let mut guard = record.tls.lock().unwrap();
    if guard.is_none() {
        match TlsSession::new(Arc::clone(tls_config)) {
            Ok(session) => *guard = Some(session),
            Err(_) => return Outcome::Terminal,
        }
    }
    let session = guard.as_mut().expect("just inserted");

    if session.conn.is_handshaking() {
        return match session.advance_handshake(stream) {
            TlsStep::Done => {
                drop(guard);
                serve_request(stream, record, site, cache)
            }
            TlsStep::WantRead | TlsStep::WantWrite => Outcome::KeepAlive,
            TlsStep::Error => {
                drop(guard);
                terminate(stream, record);
                Outcome::Terminal
            }
        };
    }

    drop(guard);
    serve_request(stream, record, site, cache)
}

fn serve_request(stream: &mut TcpStream, record: &ConnectionRecord, site: &Site, cache: &FileCache) -> Outcome {
    let mut guard = record.tls.lock().unwrap();
    let session = match guard.as_mut() {
        Some(s) => s,
        None => return Outcome::Terminal,
    };

    let mut buf = Vec::new();
    loop {
        match session.read_plaintext(stream, &mut buf) {
            Ok(0) if buf.is_empty() => {
                drop(guard);
                terminate(stream, record);
                return Outcome::Terminal;
            }
            Ok(0) => break,
            Ok(_) => {
                if contains_header_terminator(&buf) {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Outcome::KeepAlive,
            Err(_) => {
                drop(guard);
                terminate(stream, record);
                return Outcome::Terminal;
            }
        }
    }

    let request = match parse_request(&buf) {
        Some(r) => r,
        None => {
            let _ = session.write_plaintext(stream, b"HTTP/1.1 400 Bad Request\r\nContent-Length: 15\r\n\r\n400 Bad Request");
            drop(guard);
            terminate(stream, record);
            return Outcome::Terminal;
        }
    };

    let keep_alive = wants_keep_alive(&request.headers);

    let result = match request.method.as_str() {
        "GET" | "HEAD" => respond_static(session, stream, site, cache, &request.path, request.method == "HEAD", keep_alive),
        "POST" => {
            let headers = build_headers(200, "OK", Some("text/plain"), request.body.len(), keep_alive);
            write_frame(session, stream, headers.as_bytes(), request.body.as_bytes())
        }
        _ => {
            let headers = build_headers(501, "Not Implemented", None, 19, keep_alive);
            write_frame(session, stream, headers.as_bytes(), b"501 Not Implemented")
        }
    };

    match result {
        Ok(()) if keep_alive => Outcome::KeepAlive,
        Ok(()) => {
            drop(guard);
            terminate(stream, record);
            Outcome::Terminal
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Outcome::KeepAlive,
        Err(_) => {
            drop(guard);
            terminate(stream, record);
            Outcome::Terminal
        }
    }
}

fn respond_static(
    session: &mut TlsSession,
    stream: &mut TcpStream,
    site: &Site,
    cache: &FileCache,
    request_path: &str,
    head_only: bool,
    keep_alive: bool,
) -> io::Result<()> {
    let file_path = resolve_path(&site.root, request_path);
    let lookup = cache.lookup(&file_path).unwrap_or(Lookup::NotFound);

    match lookup {
        Lookup::NotFound => {
            let headers = build_headers(404, "Not Found", None, 13, keep_alive);
            write_frame(session, stream, headers.as_bytes(), b"404 Not Found")
        }
        Lookup::Cached(entry) => {
            let body: &[u8] = if head_only { &[] } else { &entry.bytes };
            let headers = build_headers(200, "OK", Some(&entry.mime), entry.size as usize, keep_alive);
            write_frame(session, stream, headers.as_bytes(), body)
        }
        Lookup::Uncached { path, size, mime } => {
            let headers = build_headers(200, "OK", Some(&mime), size as usize, keep_alive);
            if head_only {
                return session.write_plaintext(stream, headers.as_bytes());
            }
            session.write_plaintext(stream, headers.as_bytes())?;
            let file = File::open(&path)?;
            // SAFETY: the file is opened read-only for the duration of this
            // call and not concurrently truncated by this process.
            let map = unsafe { Mmap::map(&file)? };
            session.write_plaintext(stream, &map)
        }
    }
}

fn write_frame(session: &mut TlsSession, stream: &mut TcpStream, headers: &[u8], body: &[u8]) -> io::Result<()> {
    session.write_plaintext(stream, headers)?;
    if !body.is_empty() {
        session.write_plaintext(stream, body)?;
    }
    Ok(())
}

/// Destroy the TLS session, deregister, and close the descriptor, in
/// that order (§4.7). Closing the `TcpStream` itself happens when the
/// reactor drops its last `Arc<ConnectionRecord>`/stream handle; this
/// only guarantees the session doesn't outlive it.
fn terminate(stream: &mut TcpStream, record: &ConnectionRecord) {
    if let Some(mut session) = record.take_tls() {
        session.shutdown(stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminate_is_a_noop_without_a_session() {
        let record = ConnectionRecord::new(8443);
        assert!(record.tls.lock().unwrap().is_none());
        // No stream needed: take_tls short-circuits to None.
        assert!(record.take_tls().is_none());
    }
}
