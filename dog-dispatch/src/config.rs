use std::time::Duration;

use serde::Deserialize;

use crate::{DispatchError, DispatchResult};

/// Largest inflight limit a dispatcher accepts
pub const MAX_INFLIGHT_LIMIT: usize = 1024;

/// Configuration for a dispatcher and its worker pool
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Used as the thread name prefix and in log fields
    pub name: String,
    /// Maximum number of items (or consumer runs, for task parallel pools)
    /// processed at once
    pub inflight_limit: usize,
    /// How often `wait_for_empty_queue_and_stop` re-checks the queue
    #[serde(with = "millis")]
    pub drain_poll_interval: Duration,
    pub pool: PoolConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            name: "dispatch".to_string(),
            inflight_limit: 1,
            drain_poll_interval: Duration::from_millis(100),
            pool: PoolConfig::default(),
        }
    }
}

impl DispatchConfig {
    /// Defaults with the inflight limit set to the host's core count
    pub fn for_host() -> Self {
        Self::default().with_inflight_limit(num_cpus::get().clamp(1, MAX_INFLIGHT_LIMIT))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_inflight_limit(mut self, limit: usize) -> Self {
        self.inflight_limit = limit;
        self
    }

    pub fn with_drain_poll_interval(mut self, interval: Duration) -> Self {
        self.drain_poll_interval = interval;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Check the values a dispatcher can't run with
    pub fn validate(&self) -> DispatchResult<()> {
        validate_inflight_limit(self.inflight_limit)?;
        self.pool.validate()
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    #[cfg(feature = "json")]
    pub fn from_json(json: &str) -> DispatchResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

pub(crate) fn validate_inflight_limit(limit: usize) -> DispatchResult<()> {
    if limit == 0 || limit > MAX_INFLIGHT_LIMIT {
        return Err(DispatchError::InvalidInflightLimit {
            requested: limit,
            max: MAX_INFLIGHT_LIMIT,
        });
    }
    Ok(())
}

/// Worker pool tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Hard cap on worker threads regardless of the inflight limit
    pub max_pool_size: usize,
    /// How often the supervisor re-sizes the pool
    #[serde(with = "millis")]
    pub supervisor_interval: Duration,
    /// Join attempts per thread on stop before it is reported as stuck
    pub join_attempts: u32,
    #[serde(with = "millis")]
    pub join_attempt_timeout: Duration,
    /// Wait between admission retries when the pool is saturated
    #[serde(with = "millis")]
    pub idle_wait: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 100,
            supervisor_interval: Duration::from_millis(50),
            join_attempts: 60,
            join_attempt_timeout: Duration::from_secs(1),
            idle_wait: Duration::from_millis(100),
        }
    }
}

impl PoolConfig {
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    pub fn with_supervisor_interval(mut self, interval: Duration) -> Self {
        self.supervisor_interval = interval;
        self
    }

    /// Bound how long `stop` waits for each thread
    pub fn with_join(mut self, attempts: u32, attempt_timeout: Duration) -> Self {
        self.join_attempts = attempts;
        self.join_attempt_timeout = attempt_timeout;
        self
    }

    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait = wait;
        self
    }

    /// Total time `stop` may spend waiting on one thread
    pub fn join_budget(&self) -> Duration {
        self.join_attempt_timeout.saturating_mul(self.join_attempts)
    }

    pub fn validate(&self) -> DispatchResult<()> {
        if self.max_pool_size == 0 {
            return Err(DispatchError::Config("max_pool_size must be at least 1".into()));
        }
        if self.join_attempts == 0 {
            return Err(DispatchError::Config("join_attempts must be at least 1".into()));
        }
        if self.supervisor_interval.is_zero() {
            return Err(DispatchError::Config("supervisor_interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// In-memory queue tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Longest `block_until_ready` waits before reporting an empty queue
    #[serde(with = "millis")]
    pub ready_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_millis(100),
        }
    }
}

/// Durations are written as whole milliseconds in config files
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DispatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool.max_pool_size, 100);
        assert_eq!(config.pool.join_budget(), Duration::from_secs(60));
        assert_eq!(QueueConfig::default().ready_timeout, Duration::from_millis(100));
    }

    #[test]
    fn host_config_uses_core_count() {
        let config = DispatchConfig::for_host();
        assert_eq!(config.inflight_limit, num_cpus::get().clamp(1, MAX_INFLIGHT_LIMIT));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inflight_limit_out_of_range_is_rejected() {
        for limit in [0, MAX_INFLIGHT_LIMIT + 1] {
            let err = DispatchConfig::default()
                .with_inflight_limit(limit)
                .validate()
                .unwrap_err();
            assert!(matches!(
                err,
                DispatchError::InvalidInflightLimit { requested, max } if requested == limit && max == MAX_INFLIGHT_LIMIT
            ));
        }
        assert!(validate_inflight_limit(MAX_INFLIGHT_LIMIT).is_ok());
    }

    #[test]
    fn bad_pool_values_are_rejected() {
        let pool = PoolConfig::default().with_max_pool_size(0);
        assert!(matches!(pool.validate(), Err(DispatchError::Config(_))));

        let pool = PoolConfig::default().with_join(0, Duration::from_millis(10));
        assert!(matches!(pool.validate(), Err(DispatchError::Config(_))));
    }

    #[cfg(feature = "json")]
    #[test]
    fn parses_partial_json_with_defaults() {
        let config = DispatchConfig::from_json(
            r#"{ "name": "mailer", "inflight_limit": 8, "pool": { "join_attempt_timeout": 250 } }"#,
        )
        .unwrap();

        assert_eq!(config.name, "mailer");
        assert_eq!(config.inflight_limit, 8);
        assert_eq!(config.pool.join_attempt_timeout, Duration::from_millis(250));
        assert_eq!(config.pool.join_attempts, 60);
        assert_eq!(config.drain_poll_interval, Duration::from_millis(100));
    }

    #[cfg(feature = "json")]
    #[test]
    fn json_errors_map_to_config_errors() {
        assert!(matches!(
            DispatchConfig::from_json("{ not json"),
            Err(DispatchError::Config(_))
        ));
        assert!(matches!(
            DispatchConfig::from_json(r#"{ "inflight_limit": 0 }"#),
            Err(DispatchError::InvalidInflightLimit { .. })
        ));
    }
}
