use crate::error::{ForemanError, Result};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, error};

/// Supervisor group running long-lived tasks concurrently
///
/// Every task runs on its own tokio task, so a panic is contained to the task
/// that raised it. The first error reported by any task is kept for
/// [`Cycle::wait`]; later errors are logged and dropped.
#[derive(Clone)]
pub struct Cycle {
    inner: Arc<CycleInner>,
}

struct CycleInner {
    /// Number of tasks that have not exited yet
    active: watch::Sender<usize>,
    first_error: Mutex<Option<ForemanError>>,
}

impl CycleInner {
    fn record(&self, task: &str, err: ForemanError) {
        let mut slot = self.first_error.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            error!("Supervised task '{}' failed: {}", task, err);
            *slot = Some(err);
        } else {
            debug!("Discarding later error from task '{}': {}", task, err);
        }
    }
}

impl Cycle {
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            inner: Arc::new(CycleInner {
                active,
                first_error: Mutex::new(None),
            }),
        }
    }

    /// Submit a task to the group
    pub fn run<F>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let inner = Arc::clone(&self.inner);
        inner.active.send_modify(|n| *n += 1);

        tokio::spawn(async move {
            let outcome = match tokio::spawn(task).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(ForemanError::TaskPanicked { task: name.clone() }),
                Err(_) => Err(ForemanError::Other(format!("task {} was cancelled", name))),
            };

            if let Err(e) = outcome {
                inner.record(&name, e);
            }

            inner.active.send_modify(|n| *n -= 1);
        });
    }

    /// Number of tasks still running
    pub fn active(&self) -> usize {
        *self.inner.active.borrow()
    }

    /// Resolve once every submitted task has exited
    pub async fn done(&self) {
        let mut rx = self.inner.active.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Wait for every task to exit and return the first error
    ///
    /// The error is handed out once; a second call returns `Ok(())`.
    pub async fn wait(&self) -> Result<()> {
        self.done().await;
        match self.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Take the first recorded error, if any, without waiting
    pub fn take_error(&self) -> Option<ForemanError> {
        self.inner
            .first_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

impl Default for Cycle {
    fn default() -> Self {
        Self::new()
    }
}
