//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Fraction of the backoff delay used as jitter in both directions.
pub const JITTER_FRACTION: f64 = 0.25;

/// Configuration consumed by each sync cycle.
///
/// A cycle takes an immutable snapshot at its start; replacing the
/// configuration on the orchestrator only affects later cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfiguration {
    /// Commit attempts per batch before giving up.
    pub max_retry_attempts: u32,
    /// Delay before the first retry.
    pub base_retry_delay: Duration,
    /// Upper bound for any retry delay.
    pub max_retry_delay: Duration,
    /// Allow syncing over expensive (metered) paths.
    pub allow_expensive_sync: bool,
    /// Allow syncing over constrained (low-data) paths.
    pub allow_constrained_sync: bool,
    /// Maximum writes per remote commit.
    pub upload_batch_size: usize,
    /// Sleep between autosync attempts.
    pub auto_sync_interval: Duration,
}

impl SyncConfiguration {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            max_retry_attempts: 5,
            base_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(60),
            allow_expensive_sync: true,
            allow_constrained_sync: false,
            upload_batch_size: 50,
            auto_sync_interval: Duration::from_secs(300),
        }
    }

    /// Sets the maximum number of commit attempts (at least 1).
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts.max(1);
        self
    }

    /// Sets the base retry delay.
    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = delay;
        self
    }

    /// Sets the maximum retry delay.
    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    /// Allows or forbids syncing on expensive paths.
    pub fn with_allow_expensive_sync(mut self, allow: bool) -> Self {
        self.allow_expensive_sync = allow;
        self
    }

    /// Allows or forbids syncing on constrained paths.
    pub fn with_allow_constrained_sync(mut self, allow: bool) -> Self {
        self.allow_constrained_sync = allow;
        self
    }

    /// Sets the upload batch size (at least 1).
    pub fn with_upload_batch_size(mut self, size: usize) -> Self {
        self.upload_batch_size = size.max(1);
        self
    }

    /// Sets the autosync interval.
    pub fn with_auto_sync_interval(mut self, interval: Duration) -> Self {
        self.auto_sync_interval = interval;
        self
    }

    /// Theoretical backoff for 1-indexed attempt `n`, without jitter:
    /// `min(base * 2^(n-1), max)`.
    pub fn backoff_base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(62) as i32;
        let secs = self.base_retry_delay.as_secs_f64() * 2f64.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_retry_delay.as_secs_f64()))
    }

    /// Backoff for attempt `n` with a caller-supplied jitter factor.
    ///
    /// `jitter` is clamped to `[-1.0, 1.0]` and scaled by
    /// [`JITTER_FRACTION`]; the result never exceeds `max_retry_delay`.
    pub fn backoff_delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let base = self.backoff_base_delay(attempt).as_secs_f64();
        let factor = 1.0 + JITTER_FRACTION * jitter.clamp(-1.0, 1.0);
        let secs = (base * factor).min(self.max_retry_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Backoff for attempt `n` with uniform ±25% jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(-1.0..=1.0);
        self.backoff_delay_with_jitter(attempt, jitter)
    }
}

impl Default for SyncConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for background job scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Minimum interval between refresh jobs.
    pub refresh_interval: Duration,
    /// Start of the daily maintenance window, as an offset from UTC midnight.
    pub maintenance_window_start: Duration,
    /// Whether the maintenance job should wait for external power.
    pub maintenance_requires_power: bool,
    /// Execution budget granted to each invocation by the host.
    pub execution_budget: Duration,
}

impl SchedulerConfig {
    /// Creates a scheduler configuration with default values.
    pub fn new() -> Self {
        Self {
            refresh_interval: Duration::from_secs(15 * 60),
            maintenance_window_start: Duration::from_secs(2 * 3600),
            maintenance_requires_power: true,
            execution_budget: Duration::from_secs(30),
        }
    }

    /// Sets the refresh interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Sets the maintenance window start (wrapped into one day).
    pub fn with_maintenance_window_start(mut self, offset: Duration) -> Self {
        self.maintenance_window_start = Duration::from_secs(offset.as_secs() % 86_400);
        self
    }

    /// Sets whether maintenance requires external power.
    pub fn with_maintenance_requires_power(mut self, required: bool) -> Self {
        self.maintenance_requires_power = required;
        self
    }

    /// Sets the per-invocation execution budget.
    pub fn with_execution_budget(mut self, budget: Duration) -> Self {
        self.execution_budget = budget;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn defaults() {
        let config = SyncConfiguration::default();
        assert_eq!(config.max_retry_attempts, 5);
        assert_eq!(config.base_retry_delay, Duration::from_secs(1));
        assert_eq!(config.max_retry_delay, Duration::from_secs(60));
        assert_eq!(config.upload_batch_size, 50);
        assert_eq!(config.auto_sync_interval, Duration::from_secs(300));
    }

    #[test]
    fn builder_clamps_zero_values() {
        let config = SyncConfiguration::new()
            .with_max_retry_attempts(0)
            .with_upload_batch_size(0);
        assert_eq!(config.max_retry_attempts, 1);
        assert_eq!(config.upload_batch_size, 1);
    }

    #[test]
    fn base_delay_is_exponential_and_capped() {
        let config = SyncConfiguration::new();
        assert_eq!(config.backoff_base_delay(0), Duration::ZERO);
        assert_eq!(config.backoff_base_delay(1), Duration::from_secs(1));
        assert_eq!(config.backoff_base_delay(2), Duration::from_secs(2));
        assert_eq!(config.backoff_base_delay(5), Duration::from_secs(16));
        assert_eq!(config.backoff_base_delay(7), Duration::from_secs(60));
        assert_eq!(config.backoff_base_delay(200), Duration::from_secs(60));
    }

    #[test]
    fn jitter_extremes() {
        let config = SyncConfiguration::new();
        assert_eq!(
            config.backoff_delay_with_jitter(3, -1.0),
            Duration::from_secs(3)
        );
        assert_eq!(
            config.backoff_delay_with_jitter(3, 1.0),
            Duration::from_secs(5)
        );
        // Never above the cap, even with positive jitter.
        assert_eq!(
            config.backoff_delay_with_jitter(10, 1.0),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn scheduler_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.refresh_interval, Duration::from_secs(900));
        assert!(config.maintenance_requires_power);

        let wrapped = config.with_maintenance_window_start(Duration::from_secs(86_400 + 60));
        assert_eq!(wrapped.maintenance_window_start, Duration::from_secs(60));
    }

    proptest! {
        #[test]
        fn jittered_delays_stay_in_bounds(seed in proptest::collection::vec(-1.0f64..=1.0, 5)) {
            let config = SyncConfiguration::new();
            let delays: Vec<Duration> = (1..=5u32)
                .map(|n| config.backoff_delay_with_jitter(n, seed[(n - 1) as usize]))
                .collect();

            for (i, delay) in delays.iter().enumerate() {
                let theoretical = config.backoff_base_delay(i as u32 + 1).as_secs_f64();
                let secs = delay.as_secs_f64();
                prop_assert!(secs <= 60.0);
                prop_assert!(secs >= theoretical * 0.75 - 1e-9);
                prop_assert!(secs <= theoretical * 1.25 + 1e-9);
            }
            for pair in delays.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
        }
    }

    #[test]
    fn random_jitter_stays_in_bounds() {
        let config = SyncConfiguration::new();
        for attempt in 1..=5 {
            let theoretical = config.backoff_base_delay(attempt).as_secs_f64();
            let secs = config.backoff_delay(attempt).as_secs_f64();
            assert!(secs >= theoretical * 0.75 - 1e-9);
            assert!(secs <= theoretical * 1.25 + 1e-9);
        }
    }
}
