use crate::config::ForemanConfig;
use crate::error::{ForemanError, Result};
use async_trait::async_trait;
use nix::sys::signal::Signal;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Stream of OS signals delivered to the orchestrator
#[async_trait]
pub trait SignalSource: Send {
    /// Next signal, or `None` once the source is closed
    async fn recv(&mut self) -> Option<Signal>;
}

/// Signals delivered by the operating system
pub struct OsSignals {
    rx: mpsc::Receiver<Signal>,
}

impl OsSignals {
    /// Install handlers for `signals`; must be called inside a tokio runtime
    ///
    /// Deliveries are buffered up to two deep; further ones are dropped until
    /// the orchestrator catches up. Tokio coalesces repeated deliveries of one
    /// signal that arrive before its stream is polled, so two identical signals
    /// sent back to back may be seen once and not escalate.
    pub fn install(signals: &[Signal]) -> Result<Self> {
        let (tx, rx) = mpsc::channel(2);

        let mut installed: Vec<Signal> = Vec::new();
        for &sig in signals {
            if installed.contains(&sig) {
                continue;
            }

            let mut stream = signal(SignalKind::from_raw(sig as i32)).map_err(|e| {
                ForemanError::SignalError(format!(
                    "Failed to install handler for {}: {}",
                    sig.as_str(),
                    e
                ))
            })?;

            let tx = tx.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    match tx.try_send(sig) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            debug!("Signal queue full, dropping {}", sig.as_str())
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
            });

            installed.push(sig);
        }

        debug!("Installed handlers for {} signals", installed.len());
        Ok(Self { rx })
    }
}

#[async_trait]
impl SignalSource for OsSignals {
    async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }
}

/// Signals injected through a channel, for embedding and tests
pub struct ChannelSignals {
    rx: mpsc::Receiver<Signal>,
}

impl ChannelSignals {
    pub fn new(capacity: usize) -> (mpsc::Sender<Signal>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl SignalSource for ChannelSignals {
    async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }
}

/// Which signals stop the process and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalPolicy {
    /// Signals that start a shutdown
    pub shutdown: Vec<Signal>,
    /// Shutdown signal that skips draining
    pub quit: Signal,
    /// Signal that hands listeners to a replacement process before stopping
    pub reload: Signal,
}

impl Default for SignalPolicy {
    fn default() -> Self {
        Self {
            shutdown: vec![Signal::SIGQUIT, Signal::SIGINT, Signal::SIGTERM],
            quit: Signal::SIGQUIT,
            reload: Signal::SIGHUP,
        }
    }
}

impl SignalPolicy {
    pub fn from_config(config: &ForemanConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shutdown: config.shutdown_signal_set()?,
            quit: crate::config::parse_signal(&config.quit_signal)?,
            reload: crate::config::parse_signal(&config.reload_signal)?,
        })
    }

    /// Every signal the orchestrator listens for
    pub fn watched(&self) -> Vec<Signal> {
        let mut signals = self.shutdown.clone();
        if !signals.contains(&self.reload) {
            signals.push(self.reload);
        }
        signals
    }

    /// Whether `signal` starts a stop at all
    pub fn is_trigger(&self, signal: Signal) -> bool {
        signal == self.reload || self.shutdown.contains(&signal)
    }

    pub fn is_graceful(&self, signal: Signal) -> bool {
        signal != self.quit
    }

    pub fn is_reload(&self, signal: Signal) -> bool {
        signal == self.reload
    }
}

/// Action taken when a second signal arrives mid-shutdown
///
/// Receives the exit status; the default ends the process.
pub type Terminator = Arc<dyn Fn(i32) + Send + Sync>;

pub fn process_exit() -> Terminator {
    Arc::new(|code| std::process::exit(code))
}

/// Exit status for an escalated shutdown
///
/// Uses the signal that started the shutdown, or the escalating one when the
/// shutdown was requested internally.
pub fn escalation_exit_code(first: Option<Signal>, escalating: Signal) -> i32 {
    128 + first.unwrap_or(escalating) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_classification() {
        let policy = SignalPolicy::default();

        assert!(policy.is_trigger(Signal::SIGTERM));
        assert!(policy.is_trigger(Signal::SIGHUP));
        assert!(!policy.is_trigger(Signal::SIGUSR1));

        assert!(policy.is_graceful(Signal::SIGTERM));
        assert!(policy.is_graceful(Signal::SIGINT));
        assert!(!policy.is_graceful(Signal::SIGQUIT));

        assert!(policy.is_reload(Signal::SIGHUP));
        assert!(!policy.is_reload(Signal::SIGTERM));
    }

    #[test]
    fn test_watched_includes_reload_once() {
        let policy = SignalPolicy::default();
        let watched = policy.watched();
        assert_eq!(watched.len(), 4);
        assert_eq!(
            watched.iter().filter(|s| **s == Signal::SIGHUP).count(),
            1
        );
    }

    #[test]
    fn test_policy_from_config() {
        let config = ForemanConfig {
            shutdown_signals: vec!["SIGTERM".to_string(), "SIGINT".to_string()],
            quit_signal: "SIGINT".to_string(),
            reload_signal: "SIGUSR2".to_string(),
            ..Default::default()
        };

        let policy = SignalPolicy::from_config(&config).unwrap();
        assert_eq!(policy.shutdown, vec![Signal::SIGTERM, Signal::SIGINT]);
        assert_eq!(policy.quit, Signal::SIGINT);
        assert_eq!(policy.reload, Signal::SIGUSR2);
        assert!(!policy.is_graceful(Signal::SIGINT));
    }

    #[test]
    fn test_escalation_exit_code() {
        // SIGTERM (15) started the shutdown, SIGINT (2) escalated it
        assert_eq!(
            escalation_exit_code(Some(Signal::SIGTERM), Signal::SIGINT),
            143
        );
        assert_eq!(escalation_exit_code(None, Signal::SIGINT), 130);
    }

    #[tokio::test]
    async fn test_channel_signals() {
        let (tx, mut source) = ChannelSignals::new(2);
        tx.send(Signal::SIGTERM).await.unwrap();
        drop(tx);

        assert_eq!(source.recv().await, Some(Signal::SIGTERM));
        assert_eq!(source.recv().await, None);
    }

    #[tokio::test]
    async fn test_os_signals_delivers_raised_signal() {
        let mut source = OsSignals::install(&[Signal::SIGUSR1]).unwrap();

        nix::sys::signal::raise(Signal::SIGUSR1).unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(5), source.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(Signal::SIGUSR1));
    }
}
