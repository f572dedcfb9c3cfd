use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::path::Path;

/// A duplicated listening socket ready to be passed to a child process
#[derive(Debug)]
pub struct ExportedListener {
    pub fd: OwnedFd,
    /// Descriptor name published in `LISTEN_FDNAMES`; never contains `:`
    pub name: String,
}

/// Listener that can hand a duplicate of its socket to a replacement process
///
/// This is the only platform-bound step of a reload.
pub trait ExportListener: Send + Sync {
    fn export(&self) -> io::Result<ExportedListener>;
}

/// File name for a listening socket, safe to join with `:`
pub(crate) fn socket_file_name(scheme: &str, addr: &str) -> String {
    format!("{}-{}", scheme, addr.replace(':', "_"))
}

fn export_fd<T: AsFd>(socket: &T, name: String) -> io::Result<ExportedListener> {
    let fd = socket.as_fd().try_clone_to_owned()?;
    Ok(ExportedListener { fd, name })
}

impl ExportListener for std::net::TcpListener {
    fn export(&self) -> io::Result<ExportedListener> {
        let addr = self.local_addr()?;
        export_fd(self, socket_file_name("tcp", &addr.to_string()))
    }
}

impl ExportListener for tokio::net::TcpListener {
    fn export(&self) -> io::Result<ExportedListener> {
        let addr = self.local_addr()?;
        export_fd(self, socket_file_name("tcp", &addr.to_string()))
    }
}

fn unix_name(path: Option<&Path>) -> String {
    let path = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "unnamed".to_string());
    socket_file_name("unix", &path)
}

impl ExportListener for std::os::unix::net::UnixListener {
    fn export(&self) -> io::Result<ExportedListener> {
        let addr = self.local_addr()?;
        export_fd(self, unix_name(addr.as_pathname()))
    }
}

impl ExportListener for tokio::net::UnixListener {
    fn export(&self) -> io::Result<ExportedListener> {
        let addr = self.local_addr()?;
        export_fd(self, unix_name(addr.as_pathname()))
    }
}
