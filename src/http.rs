//! Plaintext HTTP/1.1 handler: request parsing, keep-alive, static-file
//! response with a zero-copy `sendfile` path, POST echo, error responses.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use mio::net::TcpStream;

use crate::cache::{FileCache, Lookup};
use crate::core::Outcome;
use crate::site::Site;

const READ_CHUNK: usize = 4096;

pub(crate) struct ParsedRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    #[allow(dead_code)]
    pub(crate) version: String,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) body: String,
}

/// Read, parse and respond to exactly one request on `stream`. Sniffing
/// has already happened; this is re-entered on every keep-alive
/// iteration starting from an empty buffer (see DESIGN NOTES §9 on
/// partial-request resumption).
pub fn serve(stream: &mut TcpStream, site: &Site, cache: &FileCache) -> Outcome {
    let raw = match read_until_headers_end(stream) {
        ReadResult::Complete(buf) => buf,
        ReadResult::PeerClosed => return Outcome::Terminal,
        ReadResult::WouldBlock => return Outcome::KeepAlive,
        ReadResult::Error => return Outcome::Terminal,
    };

    let request = match parse_request(&raw) {
        Some(r) => r,
        None => {
            let _ = write_response(stream, 400, "Bad Request", None, b"400 Bad Request", false);
            return Outcome::Terminal;
        }
    };

    let keep_alive = wants_keep_alive(&request.headers);

    let outcome = match request.method.as_str() {
        "GET" | "HEAD" => {
            serve_static(stream, site, cache, &request.path, request.method == "HEAD", keep_alive)
        }
        "POST" => {
            let body = request.body.as_bytes();
            write_response(stream, 200, "OK", Some("text/plain"), body, keep_alive)
        }
        _ => write_response(stream, 501, "Not Implemented", None, b"501 Not Implemented", keep_alive),
    };

    match outcome {
        WriteOutcome::Ok if keep_alive => Outcome::KeepAlive,
        WriteOutcome::Ok => Outcome::Terminal,
        WriteOutcome::WouldBlock => Outcome::KeepAlive,
        WriteOutcome::BrokenPipe | WriteOutcome::Error => Outcome::Terminal,
    }
}

enum ReadResult {
    Complete(Vec<u8>),
    PeerClosed,
    WouldBlock,
    Error,
}

fn read_until_headers_end(stream: &mut TcpStream) -> ReadResult {
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return ReadResult::PeerClosed,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if contains_header_terminator(&buf) {
                    return ReadResult::Complete(buf);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadResult::WouldBlock,
            Err(_) => return ReadResult::Error,
        }
    }
}

pub(crate) fn contains_header_terminator(buf: &[u8]) -> bool {
    buf.windows(4).any(|w| w == b"\r\n\r\n")
}

pub(crate) fn parse_request(raw: &[u8]) -> Option<ParsedRequest> {
    let text = String::from_utf8_lossy(raw);
    let header_end = text.find("\r\n\r\n")?;
    let (head, rest) = text.split_at(header_end);
    let body = rest.get(4..).unwrap_or("").to_string();

    let mut lines = head.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();
    let version = parts.next()?.to_string();
    if method.is_empty() || path.is_empty() || version.is_empty() {
        return None;
    }

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    Some(ParsedRequest { method, path, version, headers, body })
}

pub(crate) fn wants_keep_alive(headers: &HashMap<String, String>) -> bool {
    headers
        .get("Connection")
        .map(|v| v.eq_ignore_ascii_case("keep-alive"))
        .unwrap_or(false)
}

pub fn resolve_path(root: &Path, request_path: &str) -> PathBuf {
    let trimmed = if request_path.is_empty() || request_path == "/" {
        "index.html"
    } else {
        request_path.trim_start_matches('/')
    };
    root.join(trimmed)
}

enum WriteOutcome {
    Ok,
    WouldBlock,
    BrokenPipe,
    Error,
}

fn serve_static(
    stream: &mut TcpStream,
    site: &Site,
    cache: &FileCache,
    request_path: &str,
    head_only: bool,
    keep_alive: bool,
) -> WriteOutcome {
    let file_path = resolve_path(&site.root, request_path);
    let lookup = match cache.lookup(&file_path) {
        Ok(l) => l,
        Err(_) => Lookup::NotFound,
    };

    match lookup {
        Lookup::NotFound => {
            write_response(stream, 404, "Not Found", None, b"404 Not Found", keep_alive)
        }
        Lookup::Cached(entry) => {
            let body: &[u8] = if head_only { &[] } else { &entry.bytes };
            write_response_with_len(
                stream,
                200,
                "OK",
                Some(&entry.mime),
                body,
                entry.size as usize,
                keep_alive,
            )
        }
        Lookup::Uncached { path, size, mime } => {
            if head_only {
                return write_response_with_len(stream, 200, "OK", Some(&mime), &[], size as usize, keep_alive);
            }
            send_file_zero_copy(stream, &path, size, &mime, keep_alive)
        }
    }
}

fn send_file_zero_copy(
    stream: &mut TcpStream,
    path: &Path,
    size: u64,
    mime: &str,
    keep_alive: bool,
) -> WriteOutcome {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return write_response(stream, 404, "Not Found", None, b"404 Not Found", keep_alive),
    };

    let headers = build_headers(200, "OK", Some(mime), size as usize, keep_alive);
    match write_all(stream, headers.as_bytes()) {
        WriteOutcome::Ok => {}
        other => return other,
    }

    let out_fd = stream.as_raw_fd();
    let in_fd = file.as_raw_fd();
    let mut offset: libc::off_t = 0;
    let mut remaining = size as usize;

    while remaining > 0 {
        let to_send = remaining.min(1 << 20);
        let sent = unsafe { libc::sendfile(out_fd, in_fd, &mut offset, to_send) };
        if sent < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock => WriteOutcome::WouldBlock,
                io::ErrorKind::BrokenPipe => WriteOutcome::BrokenPipe,
                _ => {
                    // Not every filesystem/kernel combination supports
                    // sendfile(2) for a given file; fall back to a
                    // buffered copy rather than failing the request.
                    return buffered_fallback(stream, path, offset as u64);
                }
            };
        }
        if sent == 0 {
            break;
        }
        remaining -= sent as usize;
    }
    WriteOutcome::Ok
}

fn buffered_fallback(stream: &mut TcpStream, path: &Path, skip: u64) -> WriteOutcome {
    match std::fs::read(path) {
        Ok(bytes) => {
            let slice = if (skip as usize) < bytes.len() { &bytes[skip as usize..] } else { &[] };
            write_all(stream, slice)
        }
        Err(_) => WriteOutcome::Error,
    }
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    reason: &str,
    content_type: Option<&str>,
    body: &[u8],
    keep_alive: bool,
) -> WriteOutcome {
    write_response_with_len(stream, status, reason, content_type, body, body.len(), keep_alive)
}

fn write_response_with_len(
    stream: &mut TcpStream,
    status: u16,
    reason: &str,
    content_type: Option<&str>,
    body: &[u8],
    content_length: usize,
    keep_alive: bool,
) -> WriteOutcome {
    let headers = build_headers(status, reason, content_type, content_length, keep_alive);
    match write_all(stream, headers.as_bytes()) {
        WriteOutcome::Ok => {}
        other => return other,
    }
    if body.is_empty() {
        WriteOutcome::Ok
    } else {
        write_all(stream, body)
    }
}

pub(crate) fn build_headers(
    status: u16,
    reason: &str,
    content_type: Option<&str>,
    content_length: usize,
    keep_alive: bool,
) -> String {
    let mut out = format!("HTTP/1.1 {status} {reason}\r\n");
    if let Some(ct) = content_type {
        out.push_str(&format!("Content-Type: {ct}\r\n"));
    }
    out.push_str(&format!("Content-Length: {content_length}\r\n"));
    if keep_alive {
        out.push_str("Connection: keep-alive\r\n");
    }
    out.push_str("\r\n");
    out
}

fn write_all(stream: &mut TcpStream, mut buf: &[u8]) -> WriteOutcome {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => return WriteOutcome::Error,
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return WriteOutcome::WouldBlock,
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return WriteOutcome::BrokenPipe,
            Err(_) => return WriteOutcome::Error,
        }
    }
    WriteOutcome::Ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_get_request() {
        let raw = b"GET /index.html HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/index.html");
        assert_eq!(req.version, "HTTP/1.1");
        assert!(!wants_keep_alive(&req.headers));
    }

    #[test]
    fn keep_alive_is_case_insensitive() {
        let raw = b"GET / HTTP/1.1\r\nConnection: Keep-Alive\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert!(wants_keep_alive(&req.headers));
    }

    #[test]
    fn rejects_a_request_line_missing_parts() {
        let raw = b"GET\r\n\r\n";
        assert!(parse_request(raw).is_none());
    }

    #[test]
    fn post_body_is_the_bytes_after_the_header_terminator() {
        let raw = b"POST /echo HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.body, "abc");
    }

    #[test]
    fn resolves_root_path_to_index_html() {
        let root = Path::new("/var/www/site");
        assert_eq!(resolve_path(root, "/"), root.join("index.html"));
        assert_eq!(resolve_path(root, ""), root.join("index.html"));
        assert_eq!(resolve_path(root, "/a/b.css"), root.join("a/b.css"));
    }

    #[test]
    fn builds_headers_with_keep_alive() {
        let headers = build_headers(200, "OK", Some("text/html"), 5, true);
        assert!(headers.contains("HTTP/1.1 200 OK\r\n"));
        assert!(headers.contains("Content-Type: text/html\r\n"));
        assert!(headers.contains("Content-Length: 5\r\n"));
        assert!(headers.contains("Connection: keep-alive\r\n"));
    }

    #[test]
    fn builds_headers_without_keep_alive() {
        let headers = build_headers(404, "Not Found", None, 13, false);
        assert!(!headers.contains("Connection:"));
        assert!(!headers.contains("Content-Type:"));
    }
}
