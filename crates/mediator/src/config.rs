//! Pipeline configuration.
//!
//! Loaded once at startup from the process environment:
//!
//! | Variable                  | Meaning                                    | Default                                              |
//! |---------------------------|--------------------------------------------|------------------------------------------------------|
//! | `DBETS_PIPELINE`          | comma-separated behavior names, outermost first | `exception,logging,performance,caching,validation` |
//! | `DBETS_SLOW_REQUEST_MS`   | slow-request warning threshold             | `500`                                                |
//! | `DBETS_CACHE_TTL_SECS`    | default query cache lifetime               | `300`                                                |
//! | `DBETS_CACHE_MAX_ENTRIES` | query cache capacity                       | `10000`                                              |

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_PIPELINE: &str = "DBETS_PIPELINE";
pub const ENV_SLOW_REQUEST_MS: &str = "DBETS_SLOW_REQUEST_MS";
pub const ENV_CACHE_TTL_SECS: &str = "DBETS_CACHE_TTL_SECS";
pub const ENV_CACHE_MAX_ENTRIES: &str = "DBETS_CACHE_MAX_ENTRIES";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid value for `{key}`: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("unknown pipeline behavior `{0}`")]
    UnknownBehavior(String),

    #[error("pipeline behavior `{0}` is listed more than once")]
    DuplicateBehavior(&'static str),
}

/// The standard cross-cutting behaviors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    ExceptionTranslation,
    Logging,
    Performance,
    Caching,
    Validation,
}

impl BehaviorKind {
    /// Exception translation outermost, validation innermost.
    pub const CANONICAL_ORDER: [BehaviorKind; 5] = [
        BehaviorKind::ExceptionTranslation,
        BehaviorKind::Logging,
        BehaviorKind::Performance,
        BehaviorKind::Caching,
        BehaviorKind::Validation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BehaviorKind::ExceptionTranslation => "exception_translation",
            BehaviorKind::Logging => "logging",
            BehaviorKind::Performance => "performance",
            BehaviorKind::Caching => "caching",
            BehaviorKind::Validation => "validation",
        }
    }
}

impl FromStr for BehaviorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exception" | "exception_translation" => Ok(BehaviorKind::ExceptionTranslation),
            "logging" => Ok(BehaviorKind::Logging),
            "performance" => Ok(BehaviorKind::Performance),
            "caching" => Ok(BehaviorKind::Caching),
            "validation" => Ok(BehaviorKind::Validation),
            other => Err(ConfigError::UnknownBehavior(other.to_string())),
        }
    }
}

impl core::fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline assembly settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Behaviors, outermost first.
    pub behaviors: Vec<BehaviorKind>,
    pub slow_request_threshold_ms: u64,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            behaviors: BehaviorKind::CANONICAL_ORDER.to_vec(),
            slow_request_threshold_ms: 500,
            cache_ttl_secs: 300,
            cache_max_entries: 10_000,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_PIPELINE) {
            config.behaviors = parse_behaviors(&raw)?;
        }
        if let Some(raw) = lookup(ENV_SLOW_REQUEST_MS) {
            config.slow_request_threshold_ms = parse_number(ENV_SLOW_REQUEST_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CACHE_TTL_SECS) {
            config.cache_ttl_secs = parse_number(ENV_CACHE_TTL_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CACHE_MAX_ENTRIES) {
            config.cache_max_entries = parse_number(ENV_CACHE_MAX_ENTRIES, &raw)?;
            if config.cache_max_entries == 0 {
                return Err(ConfigError::Invalid {
                    key: ENV_CACHE_MAX_ENTRIES,
                    message: "must be at least 1".to_string(),
                });
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, kind) in self.behaviors.iter().enumerate() {
            if self.behaviors[..i].contains(kind) {
                return Err(ConfigError::DuplicateBehavior(kind.as_str()));
            }
        }
        Ok(())
    }

    pub fn with_behaviors(mut self, behaviors: impl Into<Vec<BehaviorKind>>) -> Self {
        self.behaviors = behaviors.into();
        self
    }

    pub fn with_slow_request_threshold(mut self, threshold: Duration) -> Self {
        self.slow_request_threshold_ms = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.as_secs();
        self
    }

    pub fn slow_request_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_request_threshold_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// True when the configured order matches exception → logging → performance → caching → validation
    /// (ignoring behaviors that are left out).
    pub fn is_canonical_order(&self) -> bool {
        let positions: Vec<usize> = self
            .behaviors
            .iter()
            .filter_map(|b| BehaviorKind::CANONICAL_ORDER.iter().position(|c| c == b))
            .collect();
        positions.windows(2).all(|w| w[0] < w[1])
    }
}

fn parse_behaviors(raw: &str) -> Result<Vec<BehaviorKind>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(BehaviorKind::from_str)
        .collect()
}

fn parse_number<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: core::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        message: e.to_string(),
    })
}
