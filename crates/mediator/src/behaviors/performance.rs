use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::envelope::RequestEnvelope;
use crate::pipeline::{DispatchResult, Next, PipelineBehavior};

/// Measures wall-clock time of the rest of the pipeline and warns above a threshold.
#[derive(Debug)]
pub struct PerformanceBehavior {
    threshold: Duration,
    slow_requests: AtomicU64,
}

impl PerformanceBehavior {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            slow_requests: AtomicU64::new(0),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Number of requests that exceeded the threshold since startup.
    pub fn slow_request_count(&self) -> u64 {
        self.slow_requests.load(Ordering::Relaxed)
    }
}

impl Default for PerformanceBehavior {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl PipelineBehavior for PerformanceBehavior {
    fn name(&self) -> &'static str {
        "performance"
    }

    async fn handle(
        &self,
        envelope: RequestEnvelope,
        ctx: &RequestContext,
        next: Next<'_>,
    ) -> DispatchResult {
        let request_type = envelope.short_type();
        let started = Instant::now();
        let result = next.run(envelope).await;
        let elapsed = started.elapsed();

        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if elapsed > self.threshold {
            self.slow_requests.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                request_type,
                correlation_id = %ctx.correlation_id(),
                elapsed_ms,
                threshold_ms = u64::try_from(self.threshold.as_millis()).unwrap_or(u64::MAX),
                "slow request"
            );
        } else {
            tracing::debug!(request_type, elapsed_ms, "request timing");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::behaviors::test_support::{Echo, capture_logs, mediator_with};
    use crate::pipeline::Pipeline;

    #[tokio::test]
    async fn warns_when_over_threshold() {
        let (logs, _guard) = capture_logs();
        let perf = Arc::new(PerformanceBehavior::new(Duration::from_millis(5)));
        let mediator = mediator_with(Pipeline::new().with_shared(perf.clone()));

        let reply = mediator
            .send(Echo::slow("late", Duration::from_millis(30)), &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(reply, "late");
        assert_eq!(perf.slow_request_count(), 1);
        let output = logs.contents();
        assert!(output.contains("WARN"));
        assert!(output.contains("slow request"));
    }

    #[tokio::test]
    async fn fast_requests_are_not_flagged() {
        let perf = Arc::new(PerformanceBehavior::new(Duration::from_secs(10)));
        let mediator = mediator_with(Pipeline::new().with_shared(perf.clone()));

        mediator.send(Echo::ok("quick"), &RequestContext::new()).await.unwrap();
        assert_eq!(perf.slow_request_count(), 0);
    }

    #[tokio::test]
    async fn failures_are_timed_and_returned_unchanged() {
        let perf = Arc::new(PerformanceBehavior::new(Duration::from_millis(1)));
        let mediator = mediator_with(Pipeline::new().with_shared(perf.clone()));

        let err = mediator
            .send(
                Echo::failing(crate::MediatorError::Cancelled).after(Duration::from_millis(20)),
                &RequestContext::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(perf.slow_request_count(), 1);
    }
}
