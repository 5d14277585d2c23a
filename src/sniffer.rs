//! First-bytes protocol sniffer.
//!
//! Runs exactly once per connection, before either protocol handler is
//! entered, by peeking (not consuming) up to 16 bytes.

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tls,
    Http,
    /// Peer closed before sending anything.
    Closed,
    Unknown,
}

const HTTP_TOKENS: [&[u8]; 10] = [
    b"GET ",
    b"POST ",
    b"HEAD ",
    b"PUT ",
    b"DELETE ",
    b"OPTIONS ",
    b"TRACE ",
    b"CONNECT ",
    b"PATCH ",
    b"HTTP/",
];

/// Classify a freshly accepted, still-unread connection.
///
/// Uses the broader two-byte TLS record-header rule (first byte in
/// `0x14..=0x17`, second byte `0x03`) rather than a narrower check against
/// `0x16` alone, so any TLS content type starts a handshake attempt instead
/// of only `ClientHello`.
pub fn sniff(peeked: &[u8]) -> Protocol {
    if peeked.is_empty() {
        return Protocol::Closed;
    }
    if peeked.len() >= 2 && matches!(peeked[0], 0x14..=0x17) && peeked[1] == 0x03 {
        return Protocol::Tls;
    }
    if HTTP_TOKENS.iter().any(|token| peeked.starts_with(token)) {
        return Protocol::Http;
    }
    Protocol::Unknown
}

/// Peek up to 16 bytes from `stream` without consuming them.
pub fn peek(stream: &mio::net::TcpStream) -> io::Result<Protocol> {
    let mut buf = [0u8; 16];
    let sock = socket2::SockRef::from(stream);
    let n = sock.peek(&mut buf)?;
    Ok(sniff(&buf[..n]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_tls_client_hello() {
        assert_eq!(sniff(&[0x16, 0x03, 0x01, 0x00, 0x2f]), Protocol::Tls);
    }

    #[test]
    fn classifies_tls_alert_and_app_data_too() {
        assert_eq!(sniff(&[0x15, 0x03, 0x03]), Protocol::Tls);
        assert_eq!(sniff(&[0x17, 0x03, 0x03]), Protocol::Tls);
        assert_eq!(sniff(&[0x14, 0x03, 0x00]), Protocol::Tls);
    }

    #[test]
    fn classifies_http_request_line() {
        assert_eq!(sniff(b"GET / HTTP/1.1\r\n"), Protocol::Http);
        assert_eq!(sniff(b"POST /echo HTTP"), Protocol::Http);
        assert_eq!(sniff(b"HTTP/1.1 200"), Protocol::Http);
    }

    #[test]
    fn classifies_closed_connection() {
        assert_eq!(sniff(&[]), Protocol::Closed);
    }

    #[test]
    fn classifies_garbage_as_unknown() {
        assert_eq!(sniff(&[0xff, 0xee, 0xdd]), Protocol::Unknown);
        assert_eq!(sniff(b"not a protocol"), Protocol::Unknown);
    }
}
