//! systemd service readiness notification.
//!
//! When the agent runs under systemd with `Type=notify`, `NOTIFY_SOCKET`
//! names a datagram socket that receives state changes. Without it every
//! call is a no-op. Failures are logged and never abort the agent.

use std::io;
use std::os::unix::net::UnixDatagram;

use tracing::debug;

/// Environment variable naming the notification socket.
pub const NOTIFY_SOCKET: &str = "NOTIFY_SOCKET";

/// Sends service state changes to systemd.
#[derive(Debug, Clone, Default)]
pub struct SystemdNotifier {
    socket: Option<String>,
}

impl SystemdNotifier {
    /// Notifier for the socket in `NOTIFY_SOCKET`, if set.
    pub fn from_env() -> Self {
        Self {
            socket: std::env::var(NOTIFY_SOCKET).ok().filter(|s| !s.is_empty()),
        }
    }

    /// Notifier for an explicit socket path. A leading `@` selects the
    /// Linux abstract namespace.
    pub fn new(socket: impl Into<String>) -> Self {
        Self {
            socket: Some(socket.into()),
        }
    }

    /// Notifier that sends nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Whether notifications are sent.
    pub fn is_enabled(&self) -> bool {
        self.socket.is_some()
    }

    /// The service is ready.
    pub fn ready(&self) {
        self.notify("READY=1");
    }

    /// The service is reloading its configuration.
    pub fn reloading(&self) {
        self.notify("RELOADING=1");
    }

    /// The service is shutting down.
    pub fn stopping(&self) {
        self.notify("STOPPING=1");
    }

    fn notify(&self, state: &str) {
        let Some(socket) = &self.socket else {
            return;
        };
        match send(socket, state) {
            Ok(()) => debug!(state, "notified service manager"),
            Err(e) => debug!(state, error = %e, "failed to notify service manager"),
        }
    }
}

fn send(socket: &str, state: &str) -> io::Result<()> {
    let datagram = UnixDatagram::unbound()?;

    if let Some(name) = socket.strip_prefix('@') {
        return send_abstract(&datagram, name, state);
    }

    datagram.send_to(state.as_bytes(), socket)?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn send_abstract(datagram: &UnixDatagram, name: &str, state: &str) -> io::Result<()> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::SocketAddr;

    let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
    datagram.send_to_addr(state.as_bytes(), &addr)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn send_abstract(_: &UnixDatagram, _: &str, _: &str) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract sockets are only supported on Linux",
    ))
}
