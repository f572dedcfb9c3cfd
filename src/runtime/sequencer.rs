use super::jobs::JobRunner;
use super::units::RunUnits;
use crate::component::OrderedServer;
use crate::error::{ForemanError, Result};
use crate::retry::RetryPolicy;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of bringing up ordered servers (or running jobs in their place)
#[derive(Debug)]
pub struct StartupOutcome {
    pub result: Result<()>,
    /// The process should stop now that startup has returned
    pub stop_requested: bool,
}

impl StartupOutcome {
    fn done(result: Result<()>) -> Self {
        Self {
            result,
            stop_requested: true,
        }
    }

    fn running() -> Self {
        Self {
            result: Ok(()),
            stop_requested: false,
        }
    }
}

/// Start ordered servers one at a time, each gated on its health probe
///
/// When jobs are configured the process runs in job mode: the jobs run to
/// completion instead and no ordered server is initialized.
pub(crate) async fn start_ordered_servers(
    units: &RunUnits,
    servers: &[Arc<dyn OrderedServer>],
    jobs: &JobRunner,
    retry: &RetryPolicy,
) -> StartupOutcome {
    if servers.is_empty() && !jobs.is_empty() {
        return run_jobs(units, jobs).await;
    }

    for server in servers {
        let name = server.name().to_string();

        if let Err(e) = server.prepare().await {
            warn!("Prepare of ordered server {} failed: {:#}", name, e);
        }

        if !jobs.is_empty() {
            return run_jobs(units, jobs).await;
        }

        if units.shutdown.is_triggered() {
            info!("Shutdown requested, not starting ordered server {}", name);
            return StartupOutcome::running();
        }

        if let Err(source) = server.init().await {
            return StartupOutcome::done(Err(ForemanError::ComponentInit { name, source }));
        }

        // A stop may have begun while init was running
        if !units.submit_server(Arc::clone(server), "ordered server", false) {
            info!("Shutdown requested, not starting ordered server {}", name);
            return StartupOutcome::running();
        }

        if !wait_healthy(server.as_ref(), units, retry).await {
            if units.shutdown.is_triggered() {
                info!("Shutdown requested while waiting for ordered server {}", name);
                return StartupOutcome::running();
            }
            warn!("Ordered server {} never became healthy", name);
            return StartupOutcome::done(Err(ForemanError::Unhealthy { server: name }));
        }

        info!("Ordered server {} is healthy", name);
    }

    StartupOutcome::running()
}

async fn run_jobs(units: &RunUnits, jobs: &JobRunner) -> StartupOutcome {
    info!("Jobs configured, running {} jobs instead of ordered servers", jobs.len());
    StartupOutcome::done(jobs.run(&units.shutdown).await)
}

async fn wait_healthy(
    server: &dyn OrderedServer,
    units: &RunUnits,
    policy: &RetryPolicy,
) -> bool {
    let mut retry = policy.begin();
    while retry.next(units.shutdown.token()).await {
        if server.health() {
            return true;
        }
        debug!(
            "Ordered server {} not healthy yet (attempt {})",
            server.name(),
            retry.attempts()
        );
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Job, Server, Shutdown, StopMode};
    use crate::registry::{NoopRegistry, ServiceInfo};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    type Events = Arc<Mutex<Vec<String>>>;

    struct Ordered {
        name: String,
        healthy: bool,
        started: AtomicBool,
        events: Events,
    }

    impl Ordered {
        fn new(name: &str, healthy: bool, events: &Events) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                healthy,
                started: AtomicBool::new(false),
                events: Arc::clone(events),
            })
        }

        fn log(&self, event: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, event));
        }
    }

    #[async_trait]
    impl Server for Ordered {
        fn name(&self) -> &str {
            &self.name
        }

        fn info(&self) -> ServiceInfo {
            ServiceInfo::new(&self.name, "grpc", "127.0.0.1:9000")
        }

        async fn init(&self) -> anyhow::Result<()> {
            self.log("init");
            Ok(())
        }

        async fn start(&self, shutdown: Shutdown) -> anyhow::Result<()> {
            self.started.store(true, Ordering::SeqCst);
            shutdown.requested().await;
            Ok(())
        }

        fn health(&self) -> bool {
            let ready = self.healthy && self.started.load(Ordering::SeqCst);
            if ready {
                self.log("healthy");
            }
            ready
        }
    }

    #[async_trait]
    impl OrderedServer for Ordered {
        async fn prepare(&self) -> anyhow::Result<()> {
            self.log("prepare");
            Ok(())
        }
    }

    struct Batch {
        name: String,
        events: Events,
    }

    #[async_trait]
    impl Job for Batch {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self, _shutdown: Shutdown) -> anyhow::Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(format!("{}:run", self.name));
            Ok(())
        }
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(200),
            ..RetryPolicy::new()
        }
    }

    fn as_ordered(servers: &[Arc<Ordered>]) -> Vec<Arc<dyn OrderedServer>> {
        servers
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn OrderedServer>)
            .collect()
    }

    #[tokio::test]
    async fn test_next_init_waits_for_previous_health() {
        let events: Events = Arc::default();
        let servers = vec![
            Ordered::new("a", true, &events),
            Ordered::new("b", true, &events),
        ];
        let units = RunUnits::new(Arc::new(NoopRegistry));
        let jobs = JobRunner::new(Vec::new());

        let outcome =
            start_ordered_servers(&units, &as_ordered(&servers), &jobs, &quick_retry()).await;

        assert!(outcome.result.is_ok());
        assert!(!outcome.stop_requested);

        let events = events.lock().unwrap().clone();
        let a_healthy = events.iter().position(|e| e == "a:healthy").unwrap();
        let b_prepare = events.iter().position(|e| e == "b:prepare").unwrap();
        let b_init = events.iter().position(|e| e == "b:init").unwrap();
        assert!(a_healthy < b_prepare);
        assert!(a_healthy < b_init);

        units.shutdown.trigger(StopMode::Graceful);
        units.cycle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_unhealthy_server_stops_sequence() {
        let events: Events = Arc::default();
        let servers = vec![
            Ordered::new("one", true, &events),
            Ordered::new("two", false, &events),
            Ordered::new("three", true, &events),
        ];
        let units = RunUnits::new(Arc::new(NoopRegistry));
        let jobs = JobRunner::new(Vec::new());

        let outcome =
            start_ordered_servers(&units, &as_ordered(&servers), &jobs, &quick_retry()).await;

        assert!(outcome.stop_requested);
        assert!(matches!(
            outcome.result,
            Err(ForemanError::Unhealthy { ref server }) if server == "two"
        ));

        let events = events.lock().unwrap().clone();
        assert!(!events.iter().any(|e| e.starts_with("three:")));
        assert!(!servers[2].started.load(Ordering::SeqCst));

        units.shutdown.trigger(StopMode::Graceful);
        units.cycle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_jobs_replace_ordered_servers() {
        let events: Events = Arc::default();
        let servers = vec![
            Ordered::new("api", true, &events),
            Ordered::new("admin", true, &events),
        ];
        let jobs: Vec<Arc<dyn Job>> = ["migrate", "seed"]
            .iter()
            .map(|name| {
                Arc::new(Batch {
                    name: name.to_string(),
                    events: Arc::clone(&events),
                }) as Arc<dyn Job>
            })
            .collect();
        let units = RunUnits::new(Arc::new(NoopRegistry));
        let runner = JobRunner::new(jobs);

        let outcome =
            start_ordered_servers(&units, &as_ordered(&servers), &runner, &quick_retry()).await;

        assert!(outcome.result.is_ok());
        assert!(outcome.stop_requested);

        let events = events.lock().unwrap().clone();
        assert!(events.contains(&"migrate:run".to_string()));
        assert!(events.contains(&"seed:run".to_string()));
        assert!(!events.iter().any(|e| e.ends_with(":init")));
        assert!(!servers.iter().any(|s| s.started.load(Ordering::SeqCst)));
        assert_eq!(units.cycle.active(), 0);
    }

    #[tokio::test]
    async fn test_jobs_without_ordered_servers() {
        let events: Events = Arc::default();
        let runner = JobRunner::new(vec![Arc::new(Batch {
            name: "report".to_string(),
            events: Arc::clone(&events),
        }) as Arc<dyn Job>]);
        let units = RunUnits::new(Arc::new(NoopRegistry));

        let outcome = start_ordered_servers(&units, &[], &runner, &quick_retry()).await;

        assert!(outcome.stop_requested);
        assert_eq!(events.lock().unwrap().as_slice(), ["report:run"]);
    }

    #[tokio::test]
    async fn test_shutdown_during_health_wait_is_not_unhealthy() {
        let events: Events = Arc::default();
        let servers = vec![Ordered::new("slow", false, &events)];
        let units = RunUnits::new(Arc::new(NoopRegistry));
        let jobs = JobRunner::new(Vec::new());
        let retry = RetryPolicy {
            timeout: Duration::from_secs(30),
            ..RetryPolicy::new()
        };

        let shutdown = units.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.trigger(StopMode::Graceful);
        });

        let outcome = start_ordered_servers(&units, &as_ordered(&servers), &jobs, &retry).await;

        assert!(outcome.result.is_ok());
        assert!(!outcome.stop_requested);
        units.cycle.wait().await.unwrap();
    }
}
