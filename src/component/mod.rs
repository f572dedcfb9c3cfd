// Component module - Capability traits the orchestrator drives

mod shutdown;

pub use shutdown::{Shutdown, StopMode};

use crate::registry::ServiceInfo;
use crate::reload::ExportListener;
use async_trait::async_trait;

/// A long-running network service
///
/// `start` is expected to run until the service stops, either because it
/// failed or because [`Shutdown`] fired.
#[async_trait]
pub trait Server: Send + Sync {
    /// Unique name used in logs and errors
    fn name(&self) -> &str;

    /// Component family, e.g. `http` or `grpc`
    fn kind(&self) -> &str {
        "server"
    }

    /// Descriptor published to the service registry
    fn info(&self) -> ServiceInfo;

    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn start(&self, shutdown: Shutdown) -> anyhow::Result<()>;

    /// Readiness probe, polled after `start` has been submitted
    fn health(&self) -> bool {
        true
    }

    /// Listener handed to a replacement process on reload
    fn reload_listener(&self) -> Option<&dyn ExportListener> {
        None
    }
}

/// A server that must be healthy before the next one in line is started
#[async_trait]
pub trait OrderedServer: Server {
    /// Runs before job-mode is decided and before `init`
    async fn prepare(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A short-lived batch task; its return is its completion
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self, shutdown: Shutdown) -> anyhow::Result<()>;
}

/// A self-scheduling periodic task
#[async_trait]
pub trait Cron: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self, shutdown: Shutdown) -> anyhow::Result<()>;
}
