use super::hooks::Hooks;
use super::jobs::JobRunner;
use super::sequencer;
use super::signals::{
    escalation_exit_code, process_exit, OsSignals, SignalPolicy, SignalSource, Terminator,
};
use super::stop::StopProcedure;
use super::units::RunUnits;
use super::{LifecycleState, StopInfo};
use crate::component::{Cron, Job, OrderedServer, Server};
use crate::config::ForemanConfig;
use crate::daemon::{notify, PidFile};
use crate::error::{ForemanError, Result};
use crate::registry::{NoopRegistry, Registry};
use crate::reload::ForkProtocol;
use crate::retry::RetryPolicy;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// One configured component, for startup summaries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSummary {
    pub name: String,
    /// `server`, `reload server`, `ordered server`, `job` or `cron`
    pub class: &'static str,
    pub kind: String,
    pub address: String,
}

/// Builder for [`Foreman`]
pub struct ForemanBuilder {
    config: ForemanConfig,
    stop_timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    servers: Vec<Arc<dyn Server>>,
    reload_servers: Vec<Arc<dyn Server>>,
    ordered_servers: Vec<Arc<dyn OrderedServer>>,
    jobs: Vec<Arc<dyn Job>>,
    crons: Vec<Arc<dyn Cron>>,
    registry: Arc<dyn Registry>,
    hooks: Hooks,
    signal_source: Option<Box<dyn SignalSource>>,
    terminator: Option<Terminator>,
    fork: Option<ForkProtocol>,
}

impl ForemanBuilder {
    pub fn new() -> Self {
        Self {
            config: ForemanConfig::default(),
            stop_timeout: None,
            retry: None,
            servers: Vec::new(),
            reload_servers: Vec::new(),
            ordered_servers: Vec::new(),
            jobs: Vec::new(),
            crons: Vec::new(),
            registry: Arc::new(NoopRegistry),
            hooks: Hooks::new(),
            signal_source: None,
            terminator: None,
            fork: None,
        }
    }

    /// Take signals, timeouts, health budget and PID file from `config`
    pub fn config(mut self, config: ForemanConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the configured stop timeout
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }

    /// Override the configured health-check retry policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn registry(mut self, registry: impl Registry + 'static) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Add a server started without ordering
    pub fn server(mut self, server: impl Server + 'static) -> Self {
        self.servers.push(Arc::new(server));
        self
    }

    /// Add a server whose listener is handed over on reload
    pub fn reload_server(mut self, server: impl Server + 'static) -> Self {
        self.reload_servers.push(Arc::new(server));
        self
    }

    /// Add a server started after every previously added ordered server is healthy
    pub fn ordered_server(mut self, server: impl OrderedServer + 'static) -> Self {
        self.ordered_servers.push(Arc::new(server));
        self
    }

    /// Add a job; any job switches the process to job mode
    pub fn job(mut self, job: impl Job + 'static) -> Self {
        self.jobs.push(Arc::new(job));
        self
    }

    pub fn cron(mut self, cron: impl Cron + 'static) -> Self {
        self.crons.push(Arc::new(cron));
        self
    }

    pub fn before_stop<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hooks.before_stop(hook);
        self
    }

    pub fn after_stop<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hooks.after_stop(hook);
        self
    }

    /// Replace the OS signal handlers
    pub fn signal_source(mut self, source: impl SignalSource + 'static) -> Self {
        self.signal_source = Some(Box::new(source));
        self
    }

    /// Replace the action taken on a second signal during shutdown
    pub fn terminator<F>(mut self, terminator: F) -> Self
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        self.terminator = Some(Arc::new(terminator));
        self
    }

    /// Program and arguments used to start the replacement on reload
    pub fn fork_protocol(mut self, fork: ForkProtocol) -> Self {
        self.fork = Some(fork);
        self
    }

    pub fn build(self) -> Result<Foreman> {
        let policy = SignalPolicy::from_config(&self.config)?;
        let stop_timeout = self.stop_timeout.unwrap_or_else(|| self.config.stop_timeout());
        let retry = self
            .retry
            .unwrap_or_else(|| self.config.health_retry_policy());
        let pid_file = self.config.pid_file.as_ref().map(PidFile::with_path);
        let (state, _) = watch::channel(LifecycleState::Starting);

        Ok(Foreman {
            policy,
            stop_timeout,
            retry,
            pid_file,
            servers: self.servers,
            reload_servers: self.reload_servers,
            ordered_servers: self.ordered_servers,
            jobs: self.jobs,
            crons: self.crons,
            registry: self.registry,
            hooks: self.hooks,
            signal_source: self.signal_source,
            terminator: self.terminator.unwrap_or_else(process_exit),
            fork: self.fork,
            state,
        })
    }
}

impl Default for ForemanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Application lifecycle orchestrator
///
/// Brings components up in order, supervises them, and tears them down when
/// a stop signal arrives, a job run completes or startup fails.
pub struct Foreman {
    policy: SignalPolicy,
    stop_timeout: Duration,
    retry: RetryPolicy,
    pid_file: Option<PidFile>,
    servers: Vec<Arc<dyn Server>>,
    reload_servers: Vec<Arc<dyn Server>>,
    ordered_servers: Vec<Arc<dyn OrderedServer>>,
    jobs: Vec<Arc<dyn Job>>,
    crons: Vec<Arc<dyn Cron>>,
    registry: Arc<dyn Registry>,
    hooks: Hooks,
    signal_source: Option<Box<dyn SignalSource>>,
    terminator: Terminator,
    fork: Option<ForkProtocol>,
    state: watch::Sender<LifecycleState>,
}

impl Foreman {
    pub fn builder() -> ForemanBuilder {
        ForemanBuilder::new()
    }

    /// Follow lifecycle transitions
    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    /// Every configured component in startup order
    pub fn components(&self) -> Vec<ComponentSummary> {
        let mut summary = Vec::new();

        let servers = self
            .servers
            .iter()
            .map(|s| ("server", s.as_ref()))
            .chain(self.reload_servers.iter().map(|s| ("reload server", s.as_ref())));
        for (class, server) in servers {
            let info = server.info();
            summary.push(ComponentSummary {
                name: server.name().to_string(),
                class,
                kind: server.kind().to_string(),
                address: info.label(),
            });
        }

        for server in &self.ordered_servers {
            summary.push(ComponentSummary {
                name: server.name().to_string(),
                class: "ordered server",
                kind: server.kind().to_string(),
                address: server.info().label(),
            });
        }

        for job in &self.jobs {
            summary.push(ComponentSummary {
                name: job.name().to_string(),
                class: "job",
                kind: "job".to_string(),
                address: "-".to_string(),
            });
        }

        for cron in &self.crons {
            summary.push(ComponentSummary {
                name: cron.name().to_string(),
                class: "cron",
                kind: "cron".to_string(),
                address: "-".to_string(),
            });
        }

        summary
    }

    /// Run until stopped
    ///
    /// Returns the first startup error, then the stop procedure's error, then
    /// the first error any component reported.
    pub async fn run(self) -> Result<()> {
        let Foreman {
            policy,
            stop_timeout,
            retry,
            pid_file,
            servers,
            reload_servers,
            ordered_servers,
            jobs,
            crons,
            registry,
            mut hooks,
            signal_source,
            terminator,
            fork,
            state,
        } = self;

        // Handlers go in before anything starts so no signal is missed
        let signals = match signal_source {
            Some(source) => source,
            None => Box::new(OsSignals::install(&policy.watched())?) as Box<dyn SignalSource>,
        };

        if let Some(pid_file) = &pid_file {
            pid_file.write()?;
            info!("Wrote PID file {}", pid_file.path().display());
        }

        let units = RunUnits::new(registry);
        let job_runner = JobRunner::new(jobs);
        let (internal_tx, internal_rx) = mpsc::channel::<String>(4);

        let (before_stop, after_stop) = hooks.take();
        let stop = StopProcedure {
            units: units.clone(),
            jobs: job_runner.cycle().clone(),
            before_stop,
            after_stop,
            reload_servers: reload_servers.clone(),
            fork,
            pid_file,
        };

        let machine = StateMachine {
            signals,
            internal: internal_rx,
            policy,
            stop_timeout,
            terminator,
            state: state.clone(),
        };
        let mut supervisor: JoinHandle<Result<()>> = tokio::spawn(machine.run(stop));

        info!(
            "Starting {} servers, {} reload servers, {} ordered servers",
            servers.len(),
            reload_servers.len(),
            ordered_servers.len()
        );

        for server in servers {
            units.submit_server(server, "server", true);
        }
        for server in reload_servers {
            units.submit_server(server, "reload server", true);
        }

        let startup =
            sequencer::start_ordered_servers(&units, &ordered_servers, &job_runner, &retry).await;
        if let Err(e) = &startup.result {
            error!("Startup failed: {}", e);
        }

        if startup.stop_requested {
            request_stop(&internal_tx, "startup finished with a stop request");
        } else if !units.shutdown.is_triggered() {
            for cron in crons {
                units.submit_cron(cron);
            }
            notify::notify(notify::READY);
        }

        state.send_if_modified(|current| {
            if *current == LifecycleState::Starting {
                *current = LifecycleState::Running;
                true
            } else {
                false
            }
        });

        let joined = tokio::select! {
            joined = &mut supervisor => joined,
            _ = units.cycle.done(), if !startup.stop_requested => {
                info!("All components exited");
                request_stop(&internal_tx, "all components exited");
                (&mut supervisor).await
            }
        };

        let stopped = joined.unwrap_or_else(|_| {
            Err(ForemanError::TaskPanicked {
                task: "signal supervisor".to_string(),
            })
        });

        let component_result = match units.cycle.take_error() {
            Some(e) => Err(e),
            None => Ok(()),
        };

        startup.result.and(stopped).and(component_result)
    }
}

fn request_stop(internal: &mpsc::Sender<String>, reason: &str) {
    if internal.try_send(reason.to_string()).is_err() {
        warn!("Stop already requested, ignoring: {}", reason);
    }
}

/// Waits for the first stop trigger, then drives the stop procedure
struct StateMachine {
    signals: Box<dyn SignalSource>,
    internal: mpsc::Receiver<String>,
    policy: SignalPolicy,
    stop_timeout: Duration,
    terminator: Terminator,
    state: watch::Sender<LifecycleState>,
}

impl StateMachine {
    async fn run(mut self, stop: StopProcedure) -> Result<()> {
        let mut signals_open = true;

        let info = loop {
            tokio::select! {
                signal = self.signals.recv(), if signals_open => match signal {
                    Some(signal) if self.policy.is_trigger(signal) => {
                        info!("Received signal {}", signal.as_str());
                        break StopInfo::from_signal(signal, &self.policy, self.stop_timeout);
                    }
                    Some(signal) => warn!("Ignoring unexpected signal {}", signal.as_str()),
                    None => signals_open = false,
                },
                reason = self.internal.recv() => {
                    let reason = reason.unwrap_or_else(|| "orchestrator exited".to_string());
                    info!("Stopping: {}", reason);
                    break StopInfo::internal(self.stop_timeout);
                }
            }
        };

        self.state.send_replace(info.state());
        info!("Lifecycle state: {}", info.state());

        let first_signal = info.signal;
        let deadline = tokio::time::sleep_until(info.deadline);
        tokio::pin!(deadline);
        let mut procedure = tokio::spawn(stop.run(info));

        let result = loop {
            tokio::select! {
                joined = &mut procedure => {
                    break joined.unwrap_or_else(|_| {
                        Err(ForemanError::TaskPanicked {
                            task: "stop procedure".to_string(),
                        })
                    });
                }
                _ = &mut deadline => {
                    error!(
                        "{}, exiting without waiting for cleanup",
                        ForemanError::StopTimeout(self.stop_timeout)
                    );
                    break Ok(());
                }
                signal = self.signals.recv(), if signals_open => match signal {
                    Some(signal) => {
                        let code = escalation_exit_code(first_signal, signal);
                        error!(
                            "Received {} during shutdown, exiting immediately with status {}",
                            signal.as_str(),
                            code
                        );
                        (self.terminator)(code);
                        break Err(ForemanError::ForcedExit(code));
                    }
                    None => signals_open = false,
                },
            }
        };

        self.state.send_replace(LifecycleState::Terminated);
        result
    }
}
