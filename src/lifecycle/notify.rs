//! Service manager readiness notification.
//!
//! Speaks the datagram protocol of `NOTIFY_SOCKET`. Running without a
//! service manager is normal and reported as `Ok(false)`.

use std::io;
use std::os::unix::net::UnixDatagram;

pub const NOTIFY_SOCKET: &str = "NOTIFY_SOCKET";

/// Tell the service manager the server is ready.
pub fn notify_ready() -> io::Result<bool> {
    notify("READY=1")
}

/// Send `state` to the socket named by `NOTIFY_SOCKET`, if any.
pub fn notify(state: &str) -> io::Result<bool> {
    match std::env::var(NOTIFY_SOCKET) {
        Ok(path) if !path.is_empty() => send(&path, state).map(|()| true),
        _ => Ok(false),
    }
}

/// Send one datagram. A leading `@` names a Linux abstract socket.
pub fn send(path: &str, state: &str) -> io::Result<()> {
    let socket = UnixDatagram::unbound()?;
    if let Some(name) = path.strip_prefix('@') {
        return send_abstract(&socket, name, state);
    }
    socket.send_to(state.as_bytes(), path)?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn send_abstract(socket: &UnixDatagram, name: &str, state: &str) -> io::Result<()> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::SocketAddr;

    let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
    socket.send_to_addr(state.as_bytes(), &addr)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn send_abstract(_: &UnixDatagram, name: &str, _: &str) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("abstract socket @{name} is only supported on Linux"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagram_reaches_the_socket() {
        let path = std::env::temp_dir().join(format!("apiserver-notify-{}.sock", uuid::Uuid::new_v4()));
        let receiver = UnixDatagram::bind(&path).unwrap();

        send(path.to_str().unwrap(), "READY=1").unwrap();

        let mut buf = [0u8; 32];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"READY=1");
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_socket_path_is_an_error() {
        assert!(send("/nonexistent/notify.sock", "READY=1").is_err());
    }
}
