use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How a component has been asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Drain in-flight work, then return
    Graceful,
    /// Return as soon as possible
    Forced,
}

/// Stop request shared by every run unit of one orchestrator
///
/// Cloning is cheap; all clones observe the same request.
#[derive(Debug, Clone)]
pub struct Shutdown {
    token: CancellationToken,
    graceful: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            graceful: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Ask every holder to stop. Only the first call decides the mode.
    pub fn trigger(&self, mode: StopMode) {
        if self.token.is_cancelled() {
            return;
        }
        self.graceful
            .store(mode == StopMode::Graceful, Ordering::SeqCst);
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Mode of the stop request; meaningful once triggered
    pub fn mode(&self) -> StopMode {
        if self.graceful.load(Ordering::SeqCst) {
            StopMode::Graceful
        } else {
            StopMode::Forced
        }
    }

    /// Resolve once a stop has been requested
    pub async fn requested(&self) -> StopMode {
        self.token.cancelled().await;
        self.mode()
    }

    /// Underlying cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_is_observed_by_clones() {
        let shutdown = Shutdown::new();
        let clone = shutdown.clone();
        assert!(!clone.is_triggered());

        shutdown.trigger(StopMode::Forced);

        assert_eq!(clone.requested().await, StopMode::Forced);
        assert!(clone.is_triggered());
    }

    #[tokio::test]
    async fn test_first_trigger_wins() {
        let shutdown = Shutdown::new();
        shutdown.trigger(StopMode::Graceful);
        shutdown.trigger(StopMode::Forced);

        assert_eq!(shutdown.mode(), StopMode::Graceful);
    }
}
