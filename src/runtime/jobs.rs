use super::cycle::Cycle;
use crate::component::{Job, Shutdown};
use crate::error::{ForemanError, Result};
use std::sync::Arc;
use tracing::info;

/// Runs every batch job concurrently to completion
pub struct JobRunner {
    jobs: Vec<Arc<dyn Job>>,
    cycle: Cycle,
}

impl JobRunner {
    pub fn new(jobs: Vec<Arc<dyn Job>>) -> Self {
        Self {
            jobs,
            cycle: Cycle::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Group the jobs run on; drained by the stop procedure
    pub fn cycle(&self) -> &Cycle {
        &self.cycle
    }

    /// Start all jobs and wait for them; returns the first failure
    pub async fn run(&self, shutdown: &Shutdown) -> Result<()> {
        info!("Running {} jobs", self.jobs.len());

        for job in &self.jobs {
            let job = Arc::clone(job);
            let name = job.name().to_string();
            let shutdown = shutdown.clone();

            self.cycle.run(name.clone(), async move {
                info!(component = %name, kind = "job", "Starting job");
                job.start(shutdown)
                    .await
                    .map_err(|e| ForemanError::component(&name, e))?;
                info!(component = %name, "Job finished");
                Ok(())
            });
        }

        self.cycle.wait().await
    }
}
