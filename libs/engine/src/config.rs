//! Configuration for the engine.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::options::{MutationOptions, QueryOptions, SubscriptionOptions};
use crate::relay::RelayPolicy;
use crate::triggers::TriggerConfig;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("{field} must be {requirement}")]
    OutOfRange {
        field: &'static str,
        requirement: &'static str,
    },
}

/// Engine configuration.
///
/// Threaded explicitly into [`Client::new`](crate::Client::new); there are no
/// process-wide defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Defaults for queries and infinite queries.
    pub query: QueryOptions,

    /// Defaults for mutations.
    pub mutation: MutationOptions,

    /// Defaults for subscriptions.
    pub subscription: SubscriptionOptions,

    /// Capacity of the inactive query cache (queries and infinite queries).
    pub query_cache_capacity: usize,

    /// Capacity of the inactive subscription cache.
    pub subscription_cache_capacity: usize,

    /// How long deactivation signals are batched before being applied.
    pub gc_flush_window: Duration,

    /// Command queue size per actor.
    pub mailbox_size: usize,

    /// Revalidation trigger settings.
    pub triggers: TriggerConfig,

    /// Error relay settings. `None` disables the relay.
    pub relay: Option<RelayPolicy>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            query: QueryOptions::default(),
            mutation: MutationOptions::default(),
            subscription: SubscriptionOptions::default(),
            query_cache_capacity: 100,
            subscription_cache_capacity: 50,
            gc_flush_window: Duration::from_millis(500),
            mailbox_size: 64,
            triggers: TriggerConfig::default(),
            relay: Some(RelayPolicy::default()),
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `BROOK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// Durations are read in milliseconds. Unset variables keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = Lookup(&lookup);

        if let Some(ms) = env.parse::<u64>("BROOK_STALE_TIME_MS")? {
            config.query.stale_time = Duration::from_millis(ms);
        }
        if let Some(ms) = env.parse::<u64>("BROOK_GC_TIME_MS")? {
            config.query.gc_time = Duration::from_millis(ms);
            config.subscription.gc_time = Duration::from_millis(ms);
        }
        if let Some(ms) = env.parse::<u64>("BROOK_KEEP_ALIVE_MS")? {
            let keep_alive = Duration::from_millis(ms);
            config.query.keep_alive_time = keep_alive;
            config.mutation.keep_alive_time = keep_alive;
            config.subscription.keep_alive_time = keep_alive;
        }
        if let Some(ms) = env.parse::<u64>("BROOK_PREFETCH_WINDOW_MS")? {
            config.query.prefetch_window_time = Duration::from_millis(ms);
        }
        if let Some(count) = env.parse::<u32>("BROOK_RETRY_COUNT")? {
            config.query.retry.count = count;
            config.subscription.retry.count = count;
        }
        if let Some(ms) = env.parse::<u64>("BROOK_RETRY_INITIAL_MS")? {
            config.query.retry.initial_interval = Duration::from_millis(ms);
            config.subscription.retry.initial_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env.parse::<u64>("BROOK_RETRY_MAX_MS")? {
            config.query.retry.max_interval = Duration::from_millis(ms);
            config.subscription.retry.max_interval = Duration::from_millis(ms);
        }
        if let Some(capacity) = env.parse("BROOK_QUERY_CACHE_CAPACITY")? {
            config.query_cache_capacity = capacity;
        }
        if let Some(capacity) = env.parse("BROOK_SUBSCRIPTION_CACHE_CAPACITY")? {
            config.subscription_cache_capacity = capacity;
        }
        if let Some(ms) = env.parse::<u64>("BROOK_GC_FLUSH_WINDOW_MS")? {
            config.gc_flush_window = Duration::from_millis(ms);
        }
        if let Some(size) = env.parse("BROOK_MAILBOX_SIZE")? {
            config.mailbox_size = size;
        }
        if let Some(enabled) = env.parse::<bool>("BROOK_RELAY_ENABLED")? {
            if !enabled {
                config.relay = None;
            }
        }
        if let Some(ms) = env.parse::<u64>("BROOK_RELAY_DEDUP_MS")? {
            if let Some(relay) = config.relay.as_mut() {
                relay.dedup_window = Duration::from_millis(ms);
            }
        }
        if let Some(ms) = env.parse::<u64>("BROOK_RESUME_DELAY_MS")? {
            config.triggers.network_resume_delay = Duration::from_millis(ms);
            config.triggers.focus_resume_delay = Duration::from_millis(ms);
        }
        if let Some(level) = lookup("BROOK_LOG_LEVEL") {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can drive an engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox_size == 0 {
            return Err(ConfigError::OutOfRange {
                field: "mailbox_size",
                requirement: "greater than zero",
            });
        }
        for retry in [&self.query.retry, &self.mutation.retry, &self.subscription.retry] {
            if retry.multiplier < 1.0 {
                return Err(ConfigError::OutOfRange {
                    field: "retry.multiplier",
                    requirement: "at least 1.0",
                });
            }
            if !(0.0..=1.0).contains(&retry.randomization_factor) {
                return Err(ConfigError::OutOfRange {
                    field: "retry.randomization_factor",
                    requirement: "between 0.0 and 1.0",
                });
            }
            if retry.initial_interval > retry.max_interval {
                return Err(ConfigError::OutOfRange {
                    field: "retry.initial_interval",
                    requirement: "no larger than retry.max_interval",
                });
            }
        }
        Ok(())
    }
}

struct Lookup<'a, F>(&'a F);

impl<F> Lookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: FromStr>(&self, var: &'static str) -> Result<Option<T>, ConfigError> {
        match (self.0)(var) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue { var, value }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mailbox_size, 64);
        assert!(config.relay.is_some());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("BROOK_STALE_TIME_MS", "1500"),
            ("BROOK_GC_TIME_MS", "5000"),
            ("BROOK_RETRY_COUNT", "1"),
            ("BROOK_QUERY_CACHE_CAPACITY", "8"),
            ("BROOK_RELAY_ENABLED", "false"),
            ("BROOK_LOG_LEVEL", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.query.stale_time, Duration::from_millis(1500));
        assert_eq!(config.query.gc_time, Duration::from_secs(5));
        assert_eq!(config.subscription.gc_time, Duration::from_secs(5));
        assert_eq!(config.query.retry.count, 1);
        assert_eq!(config.query_cache_capacity, 8);
        assert!(config.relay.is_none());
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_invalid_number() {
        let err = EngineConfig::from_lookup(lookup(&[("BROOK_MAILBOX_SIZE", "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: "BROOK_MAILBOX_SIZE",
                value: "lots".to_string()
            }
        );
    }

    #[test]
    fn test_zero_mailbox_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[("BROOK_MAILBOX_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "mailbox_size", .. }));
    }

    #[test]
    fn test_retry_interval_order_checked() {
        let err = EngineConfig::from_lookup(lookup(&[
            ("BROOK_RETRY_INITIAL_MS", "5000"),
            ("BROOK_RETRY_MAX_MS", "100"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));
    }
}
