use super::cycle::Cycle;
use super::hooks::{run_serial_log_error, run_serial_return_error, Hook};
use super::units::RunUnits;
use super::StopInfo;
use crate::component::Server;
use crate::daemon::{notify, PidFile};
use crate::error::Result;
use crate::reload::ForkProtocol;
use std::sync::Arc;
use tracing::{error, info, warn};

/// The single shutdown pass: hooks, optional reload, drain, deregister
pub(crate) struct StopProcedure {
    pub units: RunUnits,
    /// Group the job runner submits to
    pub jobs: Cycle,
    pub before_stop: Vec<Hook>,
    pub after_stop: Vec<Hook>,
    pub reload_servers: Vec<Arc<dyn Server>>,
    /// Protocol used on reload; defaults to re-running this process
    pub fork: Option<ForkProtocol>,
    pub pid_file: Option<PidFile>,
}

impl StopProcedure {
    /// Run the procedure once
    ///
    /// A before-stop failure skips the remaining before-stop hooks and is the
    /// returned error; a failed reload is returned after it. Neither prevents
    /// components from being stopped or after-stop hooks from running.
    pub async fn run(self, info: StopInfo) -> Result<()> {
        let StopProcedure {
            units,
            jobs,
            before_stop,
            after_stop,
            reload_servers,
            fork,
            pid_file,
        } = self;

        info!(
            "Stop procedure started at {} (graceful: {}, reload: {})",
            info.started_at.format("%Y-%m-%d %H:%M:%S"),
            info.graceful,
            info.reload
        );

        let mut outcome = run_serial_return_error(before_stop).await;
        if let Err(e) = &outcome {
            error!("Before-stop hooks aborted: {}", e);
        }

        if info.reload {
            match reload(fork, &reload_servers) {
                Ok(pid) => {
                    if let Some(pid_file) = &pid_file {
                        if let Err(e) = pid_file.write_pid(pid) {
                            error!("Failed to hand PID file to PID {}: {}", pid, e);
                        }
                    }
                    notify::notify(&notify::main_pid(pid));
                }
                Err(e) => {
                    error!("Reload failed, stopping without a replacement: {}", e);
                    if outcome.is_ok() {
                        outcome = Err(e);
                    }
                }
            }
        } else {
            notify::notify(notify::STOPPING);
        }

        units.stop(info.mode());

        let drained = tokio::time::timeout_at(info.deadline, async {
            units.cycle.done().await;
            jobs.done().await;
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} components still running at the stop deadline",
                units.cycle.active() + jobs.active()
            );
        }

        let withdrawn = units.unregister_outstanding().await;
        if withdrawn > 0 {
            info!("Unregistered {} services still registered at shutdown", withdrawn);
        }

        let failed = run_serial_log_error(after_stop).await;
        if failed > 0 {
            warn!("{} after-stop hooks failed", failed);
        }

        if let Some(pid_file) = &pid_file {
            match pid_file.remove_if_owned(std::process::id()) {
                Ok(true) => info!("Removed PID file {}", pid_file.path().display()),
                Ok(false) => {}
                Err(e) => error!("{}", e),
            }
        }

        info!(
            "Stop procedure finished in {:?}",
            info.started.elapsed()
        );
        outcome
    }
}

fn reload(fork: Option<ForkProtocol>, servers: &[Arc<dyn Server>]) -> Result<u32> {
    let fork = match fork {
        Some(fork) => fork,
        None => ForkProtocol::from_current_process()?,
    };

    info!("Reloading: handing {} listeners to a new process", servers.len());
    fork.fork_child(
        servers
            .iter()
            .map(|s| (s.name(), s.reload_listener())),
    )
}
