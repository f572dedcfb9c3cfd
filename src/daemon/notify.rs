// Service manager readiness notifications over $NOTIFY_SOCKET

use crate::error::{ForemanError, Result};
use std::os::unix::net::UnixDatagram;
use tracing::{error, info};

/// Environment variable naming the service manager's datagram socket
pub const ENV_NOTIFY_SOCKET: &str = "NOTIFY_SOCKET";

pub const READY: &str = "READY=1";
pub const STOPPING: &str = "STOPPING=1";

/// `MAINPID=<pid>` message announcing a new main process
pub fn main_pid(pid: u32) -> String {
    format!("MAINPID={}", pid)
}

/// Send a state string to the service manager
///
/// Returns `Ok(false)` when no manager is listening (`NOTIFY_SOCKET` unset).
pub fn sd_notify(state: &str) -> Result<bool> {
    let socket_path = match std::env::var_os(ENV_NOTIFY_SOCKET) {
        Some(path) if !path.is_empty() => path,
        _ => return Ok(false),
    };

    let socket = UnixDatagram::unbound()
        .map_err(|e| ForemanError::Other(format!("Failed to open notify socket: {}", e)))?;

    let path = socket_path.to_string_lossy();
    let sent = if let Some(name) = path.strip_prefix('@') {
        send_abstract(&socket, name, state)
    } else {
        socket.send_to(state.as_bytes(), &socket_path)
    };

    sent.map_err(|e| ForemanError::Other(format!("Failed to notify {}: {}", path, e)))?;
    Ok(true)
}

#[cfg(target_os = "linux")]
fn send_abstract(socket: &UnixDatagram, name: &str, state: &str) -> std::io::Result<usize> {
    use std::os::linux::net::SocketAddrExt;
    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
    socket.send_to_addr(state.as_bytes(), &addr)
}

#[cfg(not(target_os = "linux"))]
fn send_abstract(_socket: &UnixDatagram, _name: &str, _state: &str) -> std::io::Result<usize> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "abstract notify sockets are Linux-only",
    ))
}

/// Send a state string and log the outcome; never fails
pub fn notify(state: &str) {
    match sd_notify(state) {
        Ok(true) => info!("Service manager notified: {}", state),
        Ok(false) => info!("Service manager notification not supported"),
        Err(e) => error!("Service manager notification failed: {}", e),
    }
}
