//! Orchestrator configuration

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string; an in-memory store is used when absent
    pub database_url: Option<String>,

    /// Redis connection string for the fast store and the queues
    pub redis_url: Option<String>,

    /// How often due repeating registrations are fired
    pub scheduler_tick: Duration,

    /// How often the orphan sweep runs
    pub reconcile_interval: Duration,

    /// Delay of one-off runs enqueued right after a job is written
    pub immediate_run_delay: Duration,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - DATABASE_URL (optional)
    /// - REDIS_URL (optional)
    /// - SCHEDULER_TICK (optional, seconds, default: 5)
    /// - RECONCILE_INTERVAL (optional, seconds, default: 300)
    /// - IMMEDIATE_RUN_DELAY (optional, milliseconds, default: 2000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
            scheduler_tick: env_parse("SCHEDULER_TICK")
                .map(Duration::from_secs)
                .unwrap_or(defaults.scheduler_tick),
            reconcile_interval: env_parse("RECONCILE_INTERVAL")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_interval),
            immediate_run_delay: env_parse("IMMEDIATE_RUN_DELAY")
                .map(Duration::from_millis)
                .unwrap_or(defaults.immediate_run_delay),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scheduler_tick.is_zero() {
            anyhow::bail!("scheduler tick must be greater than 0");
        }
        if self.reconcile_interval.is_zero() {
            anyhow::bail!("reconcile interval must be greater than 0");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            scheduler_tick: Duration::from_secs(5),
            reconcile_interval: Duration::from_secs(300),
            immediate_run_delay: Duration::from_millis(2000),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scheduler_tick, Duration::from_secs(5));
        assert_eq!(config.immediate_run_delay, Duration::from_millis(2000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_tick_rejected() {
        let config = Config {
            scheduler_tick: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
