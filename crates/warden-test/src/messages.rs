//! Argument-map builders for proxy messages.

use std::net::Ipv4Addr;

use warden_core::Args;

/// A typical request message for `app` with transaction id `id`.
///
/// Carries connection facts, a `GET /` request line and a `Host` header.
/// Use [`Args::with`] to override or add fields.
pub fn request_args(app: &str, id: &str) -> Args {
    Args::new()
        .with("app", app)
        .with("id", id)
        .with("src-ip", Ipv4Addr::new(10, 0, 0, 1))
        .with("src-port", 40_000_u16)
        .with("dst-ip", Ipv4Addr::new(10, 0, 0, 2))
        .with("dst-port", 8080_u16)
        .with("method", "GET")
        .with("path", "/")
        .with("version", "1.1")
        .with("headers", "Host: example.com\r\nUser-Agent: warden-test\r\n")
}

/// A typical response message for `app` answering transaction `id`.
pub fn response_args(app: &str, id: &str, status: u16) -> Args {
    Args::new()
        .with("app", app)
        .with("id", id)
        .with("status", status)
        .with("version", "1.1")
        .with("headers", "Content-Type: text/plain\r\n")
        .with("body", b"ok".as_slice())
}
