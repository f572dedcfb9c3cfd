use super::listener::ExportListener;
use super::{
    ENV_FORK_CHILD, ENV_LISTEN_FDNAMES, ENV_LISTEN_FDS, LISTEN_FDS_START, RELOAD_FLAG,
    RELOAD_FLAG_LONG,
};
use crate::error::{ForemanError, Result};
use nix::fcntl::{fcntl, FcntlArg};
use nix::unistd::dup2;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// Everything needed to launch a replacement process
#[derive(Debug)]
pub struct ForkPlan {
    /// Exported descriptors, in the order they appear in the child
    pub files: Vec<OwnedFd>,
    /// Descriptor names, one per file
    pub names: Vec<String>,
    /// Arguments for the replacement, reload flag included
    pub args: Vec<String>,
}

impl ForkPlan {
    /// Environment published to the child on top of the inherited one
    pub fn env(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_LISTEN_FDS, self.files.len().to_string()),
            (ENV_LISTEN_FDNAMES, self.names.join(":")),
            (ENV_FORK_CHILD, "1".to_string()),
        ]
    }
}

/// Re-executes the current program with its listening sockets attached
#[derive(Debug, Clone)]
pub struct ForkProtocol {
    program: PathBuf,
    args: Vec<String>,
}

impl ForkProtocol {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Use `argv[0]` and the original arguments of this process
    ///
    /// `argv[0]` is preferred over the resolved executable so that a binary
    /// replaced on disk is picked up by the reload.
    pub fn from_current_process() -> Result<Self> {
        let mut argv = std::env::args();
        let program = match argv.next() {
            Some(arg0) => PathBuf::from(arg0),
            None => std::env::current_exe()?,
        };
        Ok(Self::new(program, argv.collect()))
    }

    /// Export every listener and build the child's arguments
    ///
    /// Any listener that is missing or cannot be exported aborts the whole
    /// reload; nothing is handed over partially.
    pub fn prepare<'a, I>(&self, listeners: I) -> Result<ForkPlan>
    where
        I: IntoIterator<Item = (&'a str, Option<&'a dyn ExportListener>)>,
    {
        let mut files = Vec::new();
        let mut names = Vec::new();

        for (server, listener) in listeners {
            let listener = listener.ok_or_else(|| ForemanError::ListenerExport {
                server: server.to_string(),
                reason: "server exposes no reloadable listener".to_string(),
            })?;

            let exported = listener.export().map_err(|e| ForemanError::ListenerExport {
                server: server.to_string(),
                reason: e.to_string(),
            })?;

            if exported.name.is_empty() || exported.name.contains(':') {
                return Err(ForemanError::ListenerExport {
                    server: server.to_string(),
                    reason: format!("invalid descriptor name '{}'", exported.name),
                });
            }

            info!("Exporting listener {} of server {}", exported.name, server);
            names.push(exported.name);
            files.push(exported.fd);
        }

        let mut args = self.args.clone();
        if !args.iter().any(|a| a == RELOAD_FLAG || a == RELOAD_FLAG_LONG) {
            args.push(RELOAD_FLAG.to_string());
        }

        Ok(ForkPlan { files, names, args })
    }

    /// Start the replacement process and return its PID without waiting on it
    pub fn launch(&self, plan: ForkPlan) -> Result<u32> {
        let count = plan.files.len() as RawFd;

        // Move every source above the target range so that mapping one
        // descriptor onto 3+i never clobbers another source.
        let sources = plan
            .files
            .iter()
            .map(|fd| relocate(fd, LISTEN_FDS_START + count))
            .collect::<Result<Vec<OwnedFd>>>()?;
        let raw: Vec<RawFd> = sources.iter().map(AsRawFd::as_raw_fd).collect();

        let mut command = Command::new(&self.program);
        command.args(&plan.args);
        command.envs(plan.env());
        command.stdin(Stdio::null());
        command.stdout(Stdio::inherit());
        command.stderr(Stdio::inherit());

        // SAFETY: the closure only calls dup2, which is async-signal-safe.
        // dup2 clears FD_CLOEXEC on the target, so targets survive exec while
        // the relocated sources are closed by it.
        unsafe {
            command.pre_exec(move || {
                for (i, fd) in raw.iter().enumerate() {
                    dup2(*fd, LISTEN_FDS_START + i as RawFd)?;
                }
                Ok(())
            });
        }

        info!(
            "Launching replacement process: {} {:?}",
            self.program.display(),
            plan.args
        );

        let child = command.spawn().map_err(|e| {
            ForemanError::Reload(format!(
                "failed to spawn {}: {}",
                self.program.display(),
                e
            ))
        })?;

        let pid = child.id().ok_or_else(|| {
            ForemanError::Reload("replacement exited before reporting a PID".to_string())
        })?;

        info!("Replacement process started with PID {}", pid);
        Ok(pid)
    }

    /// Export listeners and launch the replacement in one step
    pub fn fork_child<'a, I>(&self, listeners: I) -> Result<u32>
    where
        I: IntoIterator<Item = (&'a str, Option<&'a dyn ExportListener>)>,
    {
        let plan = self.prepare(listeners)?;
        self.launch(plan)
    }
}

/// Duplicate `fd` onto the lowest free descriptor >= `min`, close-on-exec
fn relocate(fd: &OwnedFd, min: RawFd) -> Result<OwnedFd> {
    let raw = fcntl(fd.as_raw_fd(), FcntlArg::F_DUPFD_CLOEXEC(min))
        .map_err(|e| ForemanError::Reload(format!("failed to duplicate descriptor: {}", e)))?;
    // SAFETY: fcntl returned a fresh descriptor that nothing else owns
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}
