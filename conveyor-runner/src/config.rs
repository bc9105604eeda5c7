//! Runner configuration
//!
//! Connection settings, worker pool sizes, plugin cache bounds and the
//! source-polling delays, all read from the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string; in-memory stores are used when absent
    pub database_url: Option<String>,

    /// Redis connection string for the fast store and the queues
    pub redis_url: Option<String>,

    /// JSON plugin registry, loaded once at startup
    pub plugin_registry_path: PathBuf,

    pub source_worker_concurrency: usize,
    pub pipeline_worker_concurrency: usize,

    /// Pipeline jobs enqueued concurrently per source page
    pub dispatch_concurrency: usize,

    pub plugin_cache_capacity: u64,
    pub plugin_cache_ttl: Duration,

    /// Re-poll delay after a full page was consumed
    pub fast_poll_delay: Duration,

    /// Re-poll delay while the external job is still running or was just submitted
    pub slow_poll_delay: Duration,

    /// How often an idle worker checks its queue
    pub queue_poll_interval: Duration,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - DATABASE_URL (optional)
    /// - REDIS_URL (optional)
    /// - PLUGIN_REGISTRY_PATH (optional, default: plugins.json)
    /// - SOURCE_WORKER_CONCURRENCY (optional, default: 5)
    /// - PIPELINE_WORKER_CONCURRENCY (optional, default: 5)
    /// - DISPATCH_CONCURRENCY (optional, default: 10)
    /// - PLUGIN_CACHE_CAPACITY (optional, default: 50)
    /// - PLUGIN_CACHE_TTL (optional, seconds, default: 1800)
    /// - FAST_POLL_DELAY (optional, seconds, default: 60)
    /// - SLOW_POLL_DELAY (optional, seconds, default: 300)
    /// - QUEUE_POLL_INTERVAL (optional, milliseconds, default: 500)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
            plugin_registry_path: std::env::var("PLUGIN_REGISTRY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.plugin_registry_path),
            source_worker_concurrency: env_parse("SOURCE_WORKER_CONCURRENCY")
                .unwrap_or(defaults.source_worker_concurrency),
            pipeline_worker_concurrency: env_parse("PIPELINE_WORKER_CONCURRENCY")
                .unwrap_or(defaults.pipeline_worker_concurrency),
            dispatch_concurrency: env_parse("DISPATCH_CONCURRENCY")
                .unwrap_or(defaults.dispatch_concurrency),
            plugin_cache_capacity: env_parse("PLUGIN_CACHE_CAPACITY")
                .unwrap_or(defaults.plugin_cache_capacity),
            plugin_cache_ttl: env_parse("PLUGIN_CACHE_TTL")
                .map(Duration::from_secs)
                .unwrap_or(defaults.plugin_cache_ttl),
            fast_poll_delay: env_parse("FAST_POLL_DELAY")
                .map(Duration::from_secs)
                .unwrap_or(defaults.fast_poll_delay),
            slow_poll_delay: env_parse("SLOW_POLL_DELAY")
                .map(Duration::from_secs)
                .unwrap_or(defaults.slow_poll_delay),
            queue_poll_interval: env_parse("QUEUE_POLL_INTERVAL")
                .map(Duration::from_millis)
                .unwrap_or(defaults.queue_poll_interval),
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.source_worker_concurrency == 0 || self.pipeline_worker_concurrency == 0 {
            anyhow::bail!("worker concurrency must be greater than 0");
        }

        if self.dispatch_concurrency == 0 {
            anyhow::bail!("dispatch_concurrency must be greater than 0");
        }

        if self.plugin_cache_capacity == 0 {
            anyhow::bail!("plugin_cache_capacity must be greater than 0");
        }

        if self.queue_poll_interval.is_zero() {
            anyhow::bail!("queue_poll_interval must be greater than 0");
        }

        if self.fast_poll_delay > self.slow_poll_delay {
            anyhow::bail!("fast_poll_delay must not exceed slow_poll_delay");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            plugin_registry_path: PathBuf::from("plugins.json"),
            source_worker_concurrency: 5,
            pipeline_worker_concurrency: 5,
            dispatch_concurrency: 10,
            plugin_cache_capacity: 50,
            plugin_cache_ttl: Duration::from_secs(30 * 60),
            fast_poll_delay: Duration::from_secs(60),
            slow_poll_delay: Duration::from_secs(300),
            queue_poll_interval: Duration::from_millis(500),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.plugin_cache_capacity, 50);
        assert_eq!(config.plugin_cache_ttl, Duration::from_secs(1800));
        assert_eq!(config.dispatch_concurrency, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.pipeline_worker_concurrency = 0;
        assert!(config.validate().is_err());
        config.pipeline_worker_concurrency = 5;

        config.fast_poll_delay = Duration::from_secs(600);
        assert!(config.validate().is_err());
        config.fast_poll_delay = Duration::from_secs(60);

        assert!(config.validate().is_ok());
    }
}
