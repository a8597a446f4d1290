#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;

const DEFAULT_POLL_INTERVAL_DURATION: Duration = Duration::from_millis(100);
const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.0;
const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.0;

/// What `classify` does when no connection is currently usable.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Park the caller until the supervisor connects, the client is stopped,
    /// or the reconnection budget runs out.
    #[default]
    WaitForConnection,
    /// Fail immediately with [`crate::error::Kind::NotConnected`].
    FailFast,
}

/// Cap on consecutive failed connection attempts.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    /// Give up after this many consecutive failures
    Attempts(u32),
    /// Never give up
    Unlimited,
}

impl Default for RetryLimit {
    fn default() -> Self {
        Self::Attempts(DEFAULT_MAX_ATTEMPTS)
    }
}

impl From<Option<u32>> for RetryLimit {
    fn from(max_attempts: Option<u32>) -> Self {
        max_attempts.map_or(Self::Unlimited, Self::Attempts)
    }
}

/// Configuration for client behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// How often the supervisor re-checks a live connection
    #[builder(default = DEFAULT_POLL_INTERVAL_DURATION)]
    pub poll_interval: Duration,
    /// Longest a single connection attempt may take before it counts as failed
    #[builder(default = DEFAULT_CONNECT_TIMEOUT_DURATION)]
    pub connect_timeout: Duration,
    /// Behavior of `classify` while disconnected
    #[builder(default)]
    pub wait_policy: WaitPolicy,
    /// Maximum accepted reply size in bytes. `None` means unlimited.
    pub max_message_size: Option<usize>,
    /// Tear down the socket when a reply times out, so a late reply can never
    /// be paired with the next request
    #[builder(default = true)]
    pub reconnect_on_timeout: bool,
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive failed attempts before giving up
    #[builder(default, into)]
    pub max_attempts: RetryLimit,
    /// Delay after the first failed attempt
    #[builder(default = DEFAULT_INITIAL_BACKOFF_DURATION)]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[builder(default = DEFAULT_MAX_BACKOFF_DURATION)]
    pub max_backoff: Duration,
    /// Multiplier applied to the delay after every failure. `1.0` keeps a fixed interval.
    #[builder(default = DEFAULT_BACKOFF_MULTIPLIER)]
    pub backoff_multiplier: f64,
    /// Jitter applied to every delay, in `[0.0, 1.0)`
    #[builder(default = DEFAULT_RANDOMIZATION_FACTOR)]
    pub randomization_factor: f64,
}

impl ReconnectConfig {
    /// Fixed `interval` between attempts, giving up after `max_attempts`.
    #[must_use]
    pub fn fixed<L: Into<RetryLimit>>(interval: Duration, max_attempts: L) -> Self {
        Self {
            max_attempts: max_attempts.into(),
            initial_backoff: interval,
            max_backoff: interval,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
        }
    }

    /// Whether `attempts` consecutive failures use up the budget.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        match self.max_attempts {
            RetryLimit::Attempts(max) => attempts >= max,
            RetryLimit::Unlimited => false,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_randomization_factor(config.randomization_factor)
            .with_max_elapsed_time(None) // We handle max attempts separately
            .build()
    }
}
