use crate::error::{ForemanError, Result};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, error};

type HookFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Zero-argument fallible cleanup callback, consumed when run
pub type Hook = Box<dyn FnOnce() -> HookFuture + Send>;

/// Cleanup callbacks run during shutdown
///
/// Before-stop hooks abort on the first failure; after-stop hooks always all
/// run and only log failures.
#[derive(Default)]
pub struct Hooks {
    before_stop: Vec<Hook>,
    after_stop: Vec<Hook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook that runs before components are asked to stop
    pub fn before_stop<F, Fut>(&mut self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.before_stop.push(boxed(hook));
    }

    /// Append a hook that runs once every component has stopped
    pub fn after_stop<F, Fut>(&mut self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.after_stop.push(boxed(hook));
    }

    pub fn is_empty(&self) -> bool {
        self.before_stop.is_empty() && self.after_stop.is_empty()
    }

    /// Take both lists, leaving this set empty
    pub fn take(&mut self) -> (Vec<Hook>, Vec<Hook>) {
        (
            std::mem::take(&mut self.before_stop),
            std::mem::take(&mut self.after_stop),
        )
    }
}

fn boxed<F, Fut>(hook: F) -> Hook
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move || Box::pin(hook()) as HookFuture)
}

/// Run hooks in order, stopping at the first failure
pub async fn run_serial_return_error(hooks: Vec<Hook>) -> Result<()> {
    for (index, hook) in hooks.into_iter().enumerate() {
        debug!("Running before-stop hook #{}", index);
        hook()
            .await
            .map_err(|source| ForemanError::Hook { index, source })?;
    }
    Ok(())
}

/// Run every hook in order, logging failures; returns the number that failed
pub async fn run_serial_log_error(hooks: Vec<Hook>) -> usize {
    let mut failed = 0;
    for (index, hook) in hooks.into_iter().enumerate() {
        debug!("Running after-stop hook #{}", index);
        if let Err(e) = hook().await {
            error!("After-stop hook #{} failed: {:#}", index, e);
            failed += 1;
        }
    }
    failed
}
