use crate::component::{Cron, Job, Shutdown};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Cron that logs a heartbeat on a fixed period
pub struct Heartbeat {
    period: Duration,
    beats: Arc<AtomicU64>,
}

impl Heartbeat {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            beats: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared beat counter
    pub fn beats(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.beats)
    }
}

#[async_trait]
impl Cron for Heartbeat {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn start(&self, shutdown: Shutdown) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.period);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.requested() => return Ok(()),
                _ = interval.tick() => {
                    let beat = self.beats.fetch_add(1, Ordering::SeqCst) + 1;
                    info!("Heartbeat #{} (pid {})", beat, std::process::id());
                }
            }
        }
    }
}

/// Job that waits for a fixed time, or until a stop is requested
pub struct SleepJob {
    name: String,
    duration: Duration,
}

impl SleepJob {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            duration,
        }
    }
}

#[async_trait]
impl Job for SleepJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, shutdown: Shutdown) -> anyhow::Result<()> {
        info!("Job {} sleeping for {:?}", self.name, self.duration);
        tokio::select! {
            _ = shutdown.requested() => anyhow::bail!("job {} interrupted", self.name),
            _ = tokio::time::sleep(self.duration) => Ok(()),
        }
    }
}
