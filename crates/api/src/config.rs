//! Server configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use inventory::DEFAULT_RESERVATION_TTL_SECS;
use saga::SweeperConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration.
///
/// | variable                   | default   |
/// |----------------------------|-----------|
/// | `HOST`                     | `0.0.0.0` |
/// | `PORT`                     | `3000`    |
/// | `RUST_LOG`                 | `info`    |
/// | `LOG_FORMAT`               | `text`    |
/// | `DATABASE_URL`             | unset, in-memory stores |
/// | `RESERVATION_TTL_SECS`     | `300`     |
/// | `SWEEP_INITIAL_DELAY_SECS` | `30`      |
/// | `SWEEP_INTERVAL_SECS`      | `60`      |
/// | `SWEEP_GRACE_SECS`         | `30`      |
/// | `SWEEP_BATCH_SIZE`         | `100`     |
/// | `OUTBOX_POLL_MILLIS`       | `500`     |
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub reservation_ttl: Duration,
    pub sweeper: SweeperConfig,
    pub outbox_poll_interval: Duration,
}

impl Config {
    /// Loads configuration from the environment. Unset or unparseable values
    /// fall back to their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let sweeper = SweeperConfig {
            initial_delay: secs("SWEEP_INITIAL_DELAY_SECS").unwrap_or(defaults.sweeper.initial_delay),
            interval: secs("SWEEP_INTERVAL_SECS").unwrap_or(defaults.sweeper.interval),
            grace: secs("SWEEP_GRACE_SECS").unwrap_or(defaults.sweeper.grace),
            batch_size: parsed("SWEEP_BATCH_SIZE").unwrap_or(defaults.sweeper.batch_size),
        };

        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: parsed("PORT").unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match std::env::var("LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            reservation_ttl: secs("RESERVATION_TTL_SECS").unwrap_or(defaults.reservation_ttl),
            sweeper,
            outbox_poll_interval: parsed("OUTBOX_POLL_MILLIS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox_poll_interval),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reservation TTL in the form the inventory expects.
    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.reservation_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_RESERVATION_TTL_SECS))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            reservation_ttl: Duration::from_secs(DEFAULT_RESERVATION_TTL_SECS as u64),
            sweeper: SweeperConfig::default(),
            outbox_poll_interval: Duration::from_millis(500),
        }
    }
}

fn parsed<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn secs(name: &str) -> Option<Duration> {
    parsed(name).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.reservation_ttl, Duration::from_secs(300));
        assert_eq!(config.sweeper.interval, Duration::from_secs(60));
        assert_eq!(config.sweeper.batch_size, 100);
        assert_eq!(config.outbox_poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_reservation_ttl_converts() {
        let config = Config::default();
        assert_eq!(config.reservation_ttl(), chrono::Duration::minutes(5));
    }
}
