use super::cycle::Cycle;
use crate::component::{Cron, Server, Shutdown, StopMode};
use crate::error::{ForemanError, Result};
use crate::registry::{Registry, ServiceInfo};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

/// Services currently published to the registry
#[derive(Default)]
pub(crate) struct Registrations {
    live: Mutex<Vec<ServiceInfo>>,
}

impl Registrations {
    /// Publish `info`; failures are logged and the entry is still tracked
    pub async fn register(&self, registry: &dyn Registry, info: &ServiceInfo) {
        if let Err(e) = registry.register(info).await {
            error!("Failed to register {} at {}: {}", info.name, info.label(), e);
        }
        self.lock().push(info.clone());
    }

    /// Withdraw `info` unless the shutdown sweep already did
    pub async fn unregister(&self, registry: &dyn Registry, info: &ServiceInfo) {
        let was_live = {
            let mut live = self.lock();
            match live
                .iter()
                .position(|i| i.name == info.name && i.address == info.address)
            {
                Some(index) => {
                    live.remove(index);
                    true
                }
                None => false,
            }
        };

        if was_live {
            withdraw(registry, info).await;
        }
    }

    /// Withdraw every entry still tracked; returns how many were withdrawn
    pub async fn unregister_all(&self, registry: &dyn Registry) -> usize {
        let outstanding = std::mem::take(&mut *self.lock());
        for info in &outstanding {
            withdraw(registry, info).await;
        }
        outstanding.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ServiceInfo>> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn withdraw(registry: &dyn Registry, info: &ServiceInfo) {
    if let Err(e) = registry.unregister(info).await {
        error!("Failed to unregister {} at {}: {}", info.name, info.label(), e);
    }
}

/// Submits servers and crons to the supervisor group
///
/// Every server run unit registers, runs until it returns, then unregisters.
/// Once [`RunUnits::stop`] has run no further units are admitted.
#[derive(Clone)]
pub(crate) struct RunUnits {
    pub cycle: Cycle,
    pub shutdown: Shutdown,
    registry: Arc<dyn Registry>,
    registrations: Arc<Registrations>,
    accepting: Arc<Mutex<bool>>,
}

impl RunUnits {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            cycle: Cycle::new(),
            shutdown: Shutdown::new(),
            registry,
            registrations: Arc::new(Registrations::default()),
            accepting: Arc::new(Mutex::new(true)),
        }
    }

    /// Submit a server; with `init` set, its `init` runs first inside the unit
    ///
    /// Returns `false` without starting anything once the group is stopping.
    pub fn submit_server<S>(&self, server: Arc<S>, class: &'static str, init: bool) -> bool
    where
        S: Server + ?Sized + 'static,
    {
        let name = server.name().to_string();
        let registry = Arc::clone(&self.registry);
        let registrations = Arc::clone(&self.registrations);
        let shutdown = self.shutdown.clone();

        self.admit(name.clone(), class, async move {
            if init {
                server
                    .init()
                    .await
                    .map_err(|source| ForemanError::ComponentInit {
                        name: name.clone(),
                        source,
                    })?;
            }

            let info = server.info();
            registrations.register(registry.as_ref(), &info).await;

            info!(
                component = %name,
                kind = %server.kind(),
                addr = %info.label(),
                "Starting {}", class
            );

            // A panicking start still has to withdraw its registration
            let runner = Arc::clone(&server);
            let result = match tokio::spawn(async move { runner.start(shutdown).await }).await {
                Ok(result) => result.map_err(|e| ForemanError::component(&name, e)),
                Err(e) if e.is_panic() => Err(ForemanError::TaskPanicked { task: name.clone() }),
                Err(_) => Err(ForemanError::Other(format!("{} {} was cancelled", class, name))),
            };

            match &result {
                Ok(()) => info!(component = %name, addr = %info.label(), "Stopped {}", class),
                Err(e) => warn!(component = %name, addr = %info.label(), "{} exited with error: {}", class, e),
            }

            registrations.unregister(registry.as_ref(), &info).await;
            result
        })
    }

    pub fn submit_cron(&self, cron: Arc<dyn Cron>) -> bool {
        let name = cron.name().to_string();
        let shutdown = self.shutdown.clone();

        self.admit(name.clone(), "cron", async move {
            info!(component = %name, kind = "cron", "Starting cron");
            let result = cron
                .start(shutdown)
                .await
                .map_err(|e| ForemanError::component(&name, e));
            info!(component = %name, "Stopped cron");
            result
        })
    }

    /// Close the group to new units, then ask every running unit to stop
    ///
    /// A unit admitted before this call is counted by the cycle, so draining
    /// afterwards waits for it.
    pub fn stop(&self, mode: StopMode) {
        *self.accepting() = false;
        self.shutdown.trigger(mode);
    }

    /// Withdraw registrations whose run units have not exited yet
    pub async fn unregister_outstanding(&self) -> usize {
        self.registrations
            .unregister_all(self.registry.as_ref())
            .await
    }

    #[cfg(test)]
    pub fn registered(&self) -> usize {
        self.registrations.len()
    }

    fn admit<F>(&self, name: String, class: &'static str, task: F) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let accepting = self.accepting();
        if !*accepting {
            info!(component = %name, "Stopping, not starting {}", class);
            return false;
        }
        self.cycle.run(name, task);
        true
    }

    fn accepting(&self) -> MutexGuard<'_, bool> {
        self.accepting.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use async_trait::async_trait;

    struct Echo {
        port: u16,
    }

    #[async_trait]
    impl Server for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn info(&self) -> ServiceInfo {
            ServiceInfo::new("echo", "tcp", format!("127.0.0.1:{}", self.port))
        }

        async fn start(&self, shutdown: Shutdown) -> anyhow::Result<()> {
            shutdown.requested().await;
            Ok(())
        }
    }

    struct BrokenInit;

    #[async_trait]
    impl Server for BrokenInit {
        fn name(&self) -> &str {
            "broken"
        }

        fn info(&self) -> ServiceInfo {
            ServiceInfo::new("broken", "tcp", "127.0.0.1:1")
        }

        async fn init(&self) -> anyhow::Result<()> {
            anyhow::bail!("missing certificate")
        }

        async fn start(&self, _shutdown: Shutdown) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl Server for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn info(&self) -> ServiceInfo {
            ServiceInfo::new("panicking", "tcp", "127.0.0.1:2")
        }

        async fn start(&self, _shutdown: Shutdown) -> anyhow::Result<()> {
            panic!("accept loop blew up")
        }
    }

    #[tokio::test]
    async fn test_server_registered_while_running() {
        let registry = Arc::new(MemoryRegistry::new());
        let units = RunUnits::new(registry.clone());

        units.submit_server(Arc::new(Echo { port: 8080 }), "server", true);

        for _ in 0..100 {
            if registry.get("echo").is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(registry.get("echo").is_some());
        assert_eq!(units.registered(), 1);

        units.stop(StopMode::Graceful);
        units.cycle.wait().await.unwrap();

        assert!(registry.is_empty());
        assert_eq!(units.registered(), 0);
    }

    #[tokio::test]
    async fn test_unregister_outstanding_runs_once() {
        let registry = Arc::new(MemoryRegistry::new());
        let units = RunUnits::new(registry.clone());
        let info = ServiceInfo::new("echo", "tcp", "127.0.0.1:8080");

        units
            .registrations
            .register(registry.as_ref(), &info)
            .await;

        assert_eq!(units.unregister_outstanding().await, 1);
        assert_eq!(units.unregister_outstanding().await, 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_init_failure_ends_unit() {
        let registry = Arc::new(MemoryRegistry::new());
        let units = RunUnits::new(registry.clone());

        units.submit_server(Arc::new(BrokenInit), "server", true);

        let err = units.cycle.wait().await.unwrap_err();
        assert!(matches!(err, ForemanError::ComponentInit { ref name, .. } if name == "broken"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_server_is_unregistered() {
        let registry = Arc::new(MemoryRegistry::new());
        let units = RunUnits::new(registry.clone());

        assert!(units.submit_server(Arc::new(Panicking), "server", true));

        let err = units.cycle.wait().await.unwrap_err();
        assert!(matches!(err, ForemanError::TaskPanicked { ref task } if task == "panicking"));
        assert!(registry.names().is_empty());
        assert_eq!(units.registered(), 0);
    }

    #[tokio::test]
    async fn test_stopped_units_refuse_new_servers() {
        let registry = Arc::new(MemoryRegistry::new());
        let units = RunUnits::new(registry.clone());

        units.stop(StopMode::Forced);

        assert!(!units.submit_server(Arc::new(Echo { port: 8081 }), "server", true));
        assert_eq!(units.cycle.active(), 0);
        tokio::task::yield_now().await;
        assert!(registry.is_empty());
        assert!(units.shutdown.is_triggered());
    }
}
