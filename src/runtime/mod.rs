// Runtime module - Orchestrates startup, supervision and shutdown of components

pub mod cycle;
mod foreman;
pub mod hooks;
mod jobs;
mod sequencer;
pub mod signals;
mod stop;
mod units;

pub use cycle::Cycle;
pub use foreman::{ComponentSummary, Foreman, ForemanBuilder};
pub use hooks::{Hook, Hooks};
pub use jobs::JobRunner;
pub use sequencer::StartupOutcome;
pub use signals::{ChannelSignals, OsSignals, SignalPolicy, SignalSource, Terminator};

use crate::component::StopMode;
use chrono::{DateTime, Local};
use nix::sys::signal::Signal;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Where the orchestrator is in its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Components are being brought up
    Starting,
    /// Startup was submitted; waiting for a stop trigger
    Running,
    /// Draining after a shutdown signal or internal stop
    StoppingGraceful,
    /// Stopping without draining (quit signal)
    StoppingForced,
    /// A replacement process was requested; draining afterwards
    Reloading,
    /// The stop procedure finished or was abandoned
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Starting => write!(f, "starting"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::StoppingGraceful => write!(f, "stopping"),
            LifecycleState::StoppingForced => write!(f, "stopping (forced)"),
            LifecycleState::Reloading => write!(f, "reloading"),
            LifecycleState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Description of one shutdown, fixed when the first trigger is observed
#[derive(Debug, Clone)]
pub struct StopInfo {
    /// Wall-clock time the stop started
    pub started_at: DateTime<Local>,
    pub started: Instant,
    /// Point after which exit proceeds without waiting for cleanup
    pub deadline: Instant,
    pub graceful: bool,
    pub reload: bool,
    /// OS signal that started the shutdown; `None` for internal requests
    pub signal: Option<Signal>,
}

impl StopInfo {
    /// Stop requested by an OS signal, classified by `policy`
    pub fn from_signal(signal: Signal, policy: &SignalPolicy, timeout: Duration) -> Self {
        let mut info = Self::internal(timeout);
        info.graceful = policy.is_graceful(signal);
        info.reload = policy.is_reload(signal);
        info.signal = Some(signal);
        info
    }

    /// Stop requested from inside the orchestrator; always graceful, never a reload
    pub fn internal(timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            started_at: Local::now(),
            started,
            deadline: started + timeout,
            graceful: true,
            reload: false,
            signal: None,
        }
    }

    pub fn mode(&self) -> StopMode {
        if self.graceful {
            StopMode::Graceful
        } else {
            StopMode::Forced
        }
    }

    /// State entered when this stop begins
    pub fn state(&self) -> LifecycleState {
        if self.reload {
            LifecycleState::Reloading
        } else if self.graceful {
            LifecycleState::StoppingGraceful
        } else {
            LifecycleState::StoppingForced
        }
    }
}
