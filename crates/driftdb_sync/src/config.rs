//! Configuration for sync sessions.

use crate::reset::ResetStrategy;
use crate::subscription::SubscriptionSet;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Configuration bound to one sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Identity of this client towards the server.
    pub client_id: Uuid,
    /// What to do when the server requires a client reset.
    pub strategy: Arc<ResetStrategy>,
    /// Classes this client syncs.
    pub subscriptions: SubscriptionSet,
    /// Retry configuration for transient transfer errors.
    pub retry: RetryConfig,
    /// Upper bound on one transfer including its retries.
    pub timeout: Duration,
    /// Subscriber the session worker logs to. Falls back to the global
    /// default when unset.
    pub log_dispatch: Option<tracing::Dispatch>,
}

impl SyncConfig {
    /// Creates a configuration with a fresh client id and the default reset
    /// strategy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client_id: Uuid::new_v4(),
            strategy: Arc::new(ResetStrategy::default()),
            subscriptions: SubscriptionSet::all(),
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
            log_dispatch: None,
        }
    }

    /// Sets the client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: Uuid) -> Self {
        self.client_id = client_id;
        self
    }

    /// Sets the client reset strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl Into<ResetStrategy>) -> Self {
        self.strategy = Arc::new(strategy.into());
        self
    }

    /// Sets the subscriptions.
    #[must_use]
    pub fn with_subscriptions(mut self, subscriptions: SubscriptionSet) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the transfer timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Routes the session's log events to `dispatch`.
    #[must_use]
    pub fn with_log_dispatch(mut self, dispatch: tracing::Dispatch) -> Self {
        self.log_dispatch = Some(dispatch);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // up to 25%
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen_range(0.0..1.0);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
