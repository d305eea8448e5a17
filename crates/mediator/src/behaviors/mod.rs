//! Standard pipeline behaviors.
//!
//! Canonical order, outermost first:
//!
//! ```text
//! exception translation → logging → performance → caching → validation → handler
//! ```
//!
//! - exception translation sees every failure, including ones raised by the other behaviors
//! - logging and timing include cache hits and validation rejections
//! - a cache hit skips validation and the handler

mod caching;
mod exception;
mod logging;
mod performance;
mod validation;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

pub use caching::{CachingBehavior, InMemoryQueryCache, QueryCache};
pub use exception::ExceptionTranslationBehavior;
pub use logging::LoggingBehavior;
pub use performance::PerformanceBehavior;
pub use validation::{ValidationBehavior, Validator, ValidatorSet};

use crate::config::{BehaviorKind, ConfigError, PipelineConfig};
use crate::pipeline::Pipeline;

/// Assemble the configured behaviors, in configured order.
///
/// A non-canonical order is accepted but logged.
pub fn standard_pipeline(
    config: &PipelineConfig,
    validators: ValidatorSet,
    cache: Arc<dyn QueryCache>,
) -> Result<Pipeline, ConfigError> {
    config.validate()?;
    if !config.is_canonical_order() {
        tracing::warn!(
            behaviors = ?config.behaviors,
            "pipeline behaviors configured in a non-canonical order"
        );
    }

    let pipeline = config
        .behaviors
        .iter()
        .fold(Pipeline::new(), |pipeline, kind| match kind {
            BehaviorKind::ExceptionTranslation => pipeline.with(ExceptionTranslationBehavior),
            BehaviorKind::Logging => pipeline.with(LoggingBehavior),
            BehaviorKind::Performance => {
                pipeline.with(PerformanceBehavior::new(config.slow_request_threshold()))
            }
            BehaviorKind::Caching => {
                pipeline.with(CachingBehavior::new(cache.clone(), config.cache_ttl()))
            }
            BehaviorKind::Validation => pipeline.with(ValidationBehavior::new(validators.clone())),
        });

    tracing::info!(behaviors = ?pipeline.names(), "request pipeline assembled");
    Ok(pipeline)
}

/// In-memory cache sized from the configuration.
pub fn default_cache(config: &PipelineConfig) -> Arc<dyn QueryCache> {
    Arc::new(InMemoryQueryCache::new(config.cache_max_entries))
}
