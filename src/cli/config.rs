use std::time::Duration;

use anyhow::{Context, Result};
use stowdb::{ConnectionConfig, RetryPolicy};

const DEFAULT_DATABASE_URL: &str = "postgres://postgres@localhost:5432/postgres";

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub connection: ConnectionConfig,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl CliConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let url = env_string("STOWDB_DATABASE_URL", DEFAULT_DATABASE_URL);
        let max_connections = env_string("STOWDB_MAX_CONNECTIONS", "4")
            .parse::<usize>()
            .context("STOWDB_MAX_CONNECTIONS must be a positive integer")?;
        let max_attempts = env_string("STOWDB_RETRY_MAX_ATTEMPTS", "10")
            .parse::<u32>()
            .context("STOWDB_RETRY_MAX_ATTEMPTS must be an integer")?;
        let backoff_ms = env_string("STOWDB_RETRY_BACKOFF_MS", "2")
            .parse::<u64>()
            .context("STOWDB_RETRY_BACKOFF_MS must be an integer number of milliseconds")?;
        let timeout_secs = env_string("STOWDB_TIMEOUT_SECS", "30")
            .parse::<u64>()
            .context("STOWDB_TIMEOUT_SECS must be an integer number of seconds")?;

        let connection = ConnectionConfig::from_url(&url)
            .context("STOWDB_DATABASE_URL must be a postgres:// URL")?
            .max_connections(max_connections);
        connection.validate().context("invalid connection settings")?;

        Ok(Self {
            connection,
            retry: RetryPolicy::new(max_attempts, Duration::from_millis(backoff_ms)),
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Replaces the connection target while keeping pool sizing.
    pub fn with_url(mut self, url: &str) -> Result<Self> {
        let max_connections = self.connection.max_connections;
        self.connection = ConnectionConfig::from_url(url)
            .context("--url must be a postgres:// URL")?
            .max_connections(max_connections);
        Ok(self)
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CliConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.connection.host, "localhost");
        assert_eq!(config.connection.max_connections, 4);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = CliConfig::from_lookup(lookup(&[
            ("STOWDB_DATABASE_URL", "postgres://app:pw@db:6432/lake"),
            ("STOWDB_RETRY_MAX_ATTEMPTS", "3"),
            ("STOWDB_RETRY_BACKOFF_MS", "10"),
        ]))
        .unwrap();
        assert_eq!(config.connection.port, 6432);
        assert_eq!(config.retry, RetryPolicy::new(3, Duration::from_millis(10)));
    }

    #[test]
    fn test_invalid_values() {
        assert!(CliConfig::from_lookup(lookup(&[("STOWDB_MAX_CONNECTIONS", "many")])).is_err());
        assert!(CliConfig::from_lookup(lookup(&[("STOWDB_MAX_CONNECTIONS", "0")])).is_err());
        assert!(CliConfig::from_lookup(lookup(&[("STOWDB_DATABASE_URL", "mysql://x@y/z")])).is_err());
    }

    #[test]
    fn test_with_url_keeps_pool_size() {
        let config = CliConfig::from_lookup(lookup(&[("STOWDB_MAX_CONNECTIONS", "8")]))
            .unwrap()
            .with_url("postgres://other@remote/db")
            .unwrap();
        assert_eq!(config.connection.host, "remote");
        assert_eq!(config.connection.max_connections, 8);
    }
}
