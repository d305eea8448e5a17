//! Database configuration.
//!
//! | Variable                         | Meaning                          | Default  |
//! |----------------------------------|----------------------------------|----------|
//! | `DATABASE_URL`                   | Postgres connection string       | required |
//! | `DATABASE_MAX_CONNECTIONS`       | pool size                        | `10`     |
//! | `DATABASE_ACQUIRE_TIMEOUT_SECS`  | wait for a pooled connection     | `30`     |

use std::time::Duration;

use dbets_mediator::ConfigError;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_MAX_CONNECTIONS: &str = "DATABASE_MAX_CONNECTIONS";
pub const ENV_ACQUIRE_TIMEOUT_SECS: &str = "DATABASE_ACQUIRE_TIMEOUT_SECS";

#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup(ENV_DATABASE_URL)
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::Missing(ENV_DATABASE_URL))?;

        let mut config = Self::new(url);

        if let Some(raw) = lookup(ENV_MAX_CONNECTIONS) {
            config.max_connections = match raw.trim().parse::<u32>() {
                Ok(0) => {
                    return Err(ConfigError::Invalid {
                        key: ENV_MAX_CONNECTIONS,
                        message: "must be at least 1".to_string(),
                    });
                }
                Ok(n) => n,
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        key: ENV_MAX_CONNECTIONS,
                        message: e.to_string(),
                    });
                }
            };
        }

        if let Some(raw) = lookup(ENV_ACQUIRE_TIMEOUT_SECS) {
            let secs = raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                key: ENV_ACQUIRE_TIMEOUT_SECS,
                message: e.to_string(),
            })?;
            config.acquire_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// The URL with any password replaced, for logs.
    pub fn redacted_url(&self) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        let Some((credentials, host)) = rest.rsplit_once('@') else {
            return self.url.clone();
        };
        match credentials.split_once(':') {
            Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
            None => self.url.clone(),
        }
    }
}

impl core::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.redacted_url())
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn missing_url_is_a_configuration_error() {
        assert_eq!(
            DatabaseConfig::from_lookup(lookup(&[])),
            Err(ConfigError::Missing(ENV_DATABASE_URL))
        );
        assert_eq!(
            DatabaseConfig::from_lookup(lookup(&[(ENV_DATABASE_URL, "  ")])),
            Err(ConfigError::Missing(ENV_DATABASE_URL))
        );
    }

    #[test]
    fn defaults_apply_when_only_url_is_set() {
        let config =
            DatabaseConfig::from_lookup(lookup(&[(ENV_DATABASE_URL, "postgres://localhost/app")]))
                .unwrap();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = DatabaseConfig::from_lookup(lookup(&[
            (ENV_DATABASE_URL, "postgres://localhost/app"),
            (ENV_MAX_CONNECTIONS, "25"),
            (ENV_ACQUIRE_TIMEOUT_SECS, "5"),
        ]))
        .unwrap();
        assert_eq!(config.max_connections, 25);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_or_garbage_pool_size_is_rejected() {
        for raw in ["0", "many"] {
            let err = DatabaseConfig::from_lookup(lookup(&[
                (ENV_DATABASE_URL, "postgres://localhost/app"),
                (ENV_MAX_CONNECTIONS, raw),
            ]))
            .unwrap_err();
            assert!(matches!(
                err,
                ConfigError::Invalid {
                    key: ENV_MAX_CONNECTIONS,
                    ..
                }
            ));
        }
    }

    #[test]
    fn debug_output_hides_the_password() {
        let config = DatabaseConfig::new("postgres://app:hunter2@db:5432/app");
        let printed = format!("{config:?}");
        assert!(printed.contains("postgres://app:***@db:5432/app"));
        assert!(!printed.contains("hunter2"));
    }
}
