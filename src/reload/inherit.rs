use super::{ENV_FORK_CHILD, ENV_LISTEN_FDNAMES, ENV_LISTEN_FDS, LISTEN_FDS_START};
use crate::error::{ForemanError, Result};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use tracing::info;

/// A listening socket received from the process that reloaded us
#[derive(Debug)]
pub struct InheritedListener {
    pub name: String,
    pub fd: OwnedFd,
}

impl InheritedListener {
    /// Convert into a non-blocking std TCP listener
    pub fn into_std_tcp(self) -> Result<std::net::TcpListener> {
        let listener = std::net::TcpListener::from(self.fd);
        listener.set_nonblocking(true)?;
        Ok(listener)
    }

    /// Convert into a tokio TCP listener; must be called inside a runtime
    pub fn into_tcp(self) -> Result<tokio::net::TcpListener> {
        Ok(tokio::net::TcpListener::from_std(self.into_std_tcp()?)?)
    }
}

/// Whether this process was started by a reload
pub fn is_forked_child() -> bool {
    std::env::var(ENV_FORK_CHILD).map(|v| v == "1").unwrap_or(false)
}

/// Take ownership of the listeners passed down by the parent process
///
/// Returns an empty list when this process was not started by a reload.
/// Must be called at most once per process: descriptors are adopted as owned.
pub fn inherited_listeners() -> Result<Vec<InheritedListener>> {
    if !is_forked_child() {
        return Ok(Vec::new());
    }

    let count = std::env::var(ENV_LISTEN_FDS)
        .map_err(|_| ForemanError::InheritError(format!("{} is not set", ENV_LISTEN_FDS)))?;
    let names = std::env::var(ENV_LISTEN_FDNAMES).unwrap_or_default();

    let plan = parse_listen_env(&count, &names)?;
    let mut listeners = Vec::with_capacity(plan.len());

    for (offset, name) in plan.into_iter().enumerate() {
        let raw = LISTEN_FDS_START + offset as RawFd;

        // Keep the socket out of any process this one launches later
        fcntl(raw, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(|e| {
            ForemanError::InheritError(format!("descriptor {} is not open: {}", raw, e))
        })?;

        info!("Inherited listener {} on descriptor {}", name, raw);
        // SAFETY: the parent placed this descriptor at 3+offset for us and
        // nothing else in this process has claimed it
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        listeners.push(InheritedListener { name, fd });
    }

    Ok(listeners)
}

/// Validate `LISTEN_FDS`/`LISTEN_FDNAMES` and return names in descriptor order
fn parse_listen_env(count: &str, names: &str) -> Result<Vec<String>> {
    let count: usize = count.trim().parse().map_err(|_| {
        ForemanError::InheritError(format!("invalid {}: '{}'", ENV_LISTEN_FDS, count))
    })?;

    if count == 0 {
        return Ok(Vec::new());
    }

    let names: Vec<String> = names.split(':').map(str::to_string).collect();
    if names.len() != count {
        return Err(ForemanError::InheritError(format!(
            "{} declares {} descriptors but {} names were published",
            ENV_LISTEN_FDS,
            count,
            names.len()
        )));
    }

    Ok(names)
}
