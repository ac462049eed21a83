//! Gate configuration.

use std::time::Duration;

/// Default number of transparent retries for a transient per-shard
/// failure.
pub const RETRY_COUNT_DEFAULT: usize = 3;

/// Default delay between transparent retries.
pub const RETRY_DELAY_DEFAULT: Duration = Duration::from_millis(200);

/// Default per-call timeout for one tablet RPC.
pub const CALL_TIMEOUT_DEFAULT: Duration = Duration::from_secs(30);

/// Configuration for the gate's scatter layer.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// The cell this gate routes within.
    pub cell: String,
    /// Delay between transparent per-shard retries.
    pub retry_delay: Duration,
    /// Transparent per-shard retries after the initial attempt.
    pub retry_count: usize,
    /// Timeout applied to each tablet RPC.
    pub timeout: Duration,
}

impl GateConfig {
    /// Creates a configuration for a cell with default timing.
    pub fn new(cell: impl Into<String>) -> Self {
        Self {
            cell: cell.into(),
            retry_delay: RETRY_DELAY_DEFAULT,
            retry_count: RETRY_COUNT_DEFAULT,
            timeout: CALL_TIMEOUT_DEFAULT,
        }
    }

    /// Sets the retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub const fn with_retry_count(mut self, retry_count: usize) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Configuration with timing suitable for tests.
    pub fn fast_for_testing(cell: impl Into<String>) -> Self {
        Self {
            cell: cell.into(),
            retry_delay: Duration::from_millis(1),
            retry_count: 2,
            timeout: Duration::from_secs(1),
        }
    }
}
