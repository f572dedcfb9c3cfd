use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Retry policy used while polling a component until it reports ready
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Overall budget measured from [`RetryPolicy::begin`]
    pub timeout: Duration,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Optional cap on the number of attempts
    pub max_attempts: Option<usize>,
    /// Backoff strategy to use between attempts
    pub backoff_strategy: BackoffStrategy,
}

impl RetryPolicy {
    /// Create a new retry policy with default values
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            initial_delay: Duration::from_millis(10),
            max_attempts: None,
            backoff_strategy: BackoffStrategy::Exponential {
                max_delay: Duration::from_secs(1),
            },
        }
    }

    /// Create a retry policy from configuration values
    pub fn from_config(
        timeout: Duration,
        initial_delay: Duration,
        max_delay: Duration,
        max_attempts: Option<usize>,
    ) -> Self {
        Self {
            timeout,
            initial_delay,
            max_attempts,
            backoff_strategy: BackoffStrategy::Exponential { max_delay },
        }
    }

    /// Start a new retry loop; the timeout starts counting now
    pub fn begin(&self) -> Retry {
        Retry {
            policy: self.clone(),
            attempt: 0,
            deadline: Instant::now() + self.timeout,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff strategy for delays between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between attempts
    Fixed,
    /// Exponential backoff with maximum delay
    Exponential { max_delay: Duration },
}

impl BackoffStrategy {
    /// Calculate the delay that follows the given (0-indexed) attempt
    pub fn calculate_delay(&self, initial_delay: Duration, attempt: usize) -> Duration {
        match self {
            BackoffStrategy::Fixed => initial_delay,
            BackoffStrategy::Exponential { max_delay } => {
                // delay = initial * 2^attempt
                let factor = 2_u32.saturating_pow(attempt.min(u32::MAX as usize) as u32);
                initial_delay.saturating_mul(factor).min(*max_delay)
            }
        }
    }
}

/// A running retry loop
///
/// ```ignore
/// let mut retry = policy.begin();
/// while retry.next(&token).await {
///     if probe() { break; }
/// }
/// ```
#[derive(Debug)]
pub struct Retry {
    policy: RetryPolicy,
    attempt: usize,
    deadline: Instant,
}

impl Retry {
    /// Wait for the next attempt slot
    ///
    /// The first call returns immediately. Later calls sleep for the backoff
    /// delay, clamped to the remaining budget. Returns `false` once the budget
    /// or attempt cap is exhausted, or when `cancel` fires.
    pub async fn next(&mut self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }

        if self.attempt == 0 {
            self.attempt = 1;
            return true;
        }

        if let Some(max) = self.policy.max_attempts {
            if self.attempt >= max {
                return false;
            }
        }

        let now = Instant::now();
        if now >= self.deadline {
            return false;
        }

        let delay = self
            .policy
            .backoff_strategy
            .calculate_delay(self.policy.initial_delay, self.attempt - 1)
            .min(self.deadline - now);

        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = sleep(delay) => {}
        }

        self.attempt += 1;
        true
    }

    /// Number of attempts handed out so far
    pub fn attempts(&self) -> usize {
        self.attempt
    }
}
