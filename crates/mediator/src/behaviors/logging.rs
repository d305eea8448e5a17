use async_trait::async_trait;
use tracing::Instrument;

use crate::context::RequestContext;
use crate::envelope::RequestEnvelope;
use crate::pipeline::{DispatchResult, Next, PipelineBehavior};

/// Opens the `mediator.send` span and records start and completion of every request.
///
/// Everything further down the pipeline (including the handler) runs inside the span, so
/// their events carry `request_type`, `request_kind` and `correlation_id`.
/// Neither the request nor the result is modified.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingBehavior;

impl LoggingBehavior {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PipelineBehavior for LoggingBehavior {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(
        &self,
        envelope: RequestEnvelope,
        ctx: &RequestContext,
        next: Next<'_>,
    ) -> DispatchResult {
        let span = tracing::info_span!(
            "mediator.send",
            request_type = envelope.short_type(),
            request_kind = envelope.kind().as_str(),
            correlation_id = %ctx.correlation_id(),
        );

        async move {
            tracing::info!("handling request");
            let result = next.run(envelope).await;

            match &result {
                Ok(_) => tracing::info!("request handled"),
                Err(err) if err.is_cancelled() => tracing::info!("request cancelled"),
                Err(err) if err.is_expected() => {
                    tracing::info!(error_kind = ?err.kind(), error = %err, "request rejected")
                }
                Err(err) => {
                    tracing::error!(error_kind = ?err.kind(), error = %err, "request failed")
                }
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use dbets_core::Violations;

    use super::*;
    use crate::behaviors::test_support::{Echo, capture_logs, mediator_with};
    use crate::error::MediatorError;

    #[tokio::test]
    async fn records_start_and_completion_inside_the_span() {
        let (logs, _guard) = capture_logs();
        let mediator = mediator_with(crate::Pipeline::new().with(LoggingBehavior));
        let ctx = RequestContext::new();

        let reply = mediator.send(Echo::ok("hi"), &ctx).await.unwrap();
        assert_eq!(reply, "hi");

        let output = logs.contents();
        assert!(output.contains("mediator.send"));
        assert!(output.contains("request_type=\"Echo\"") || output.contains("request_type=Echo"));
        assert!(output.contains(&ctx.correlation_id().to_string()));
        assert!(output.contains("handling request"));
        assert!(output.contains("request handled"));
    }

    #[tokio::test]
    async fn validation_failures_are_not_logged_as_errors() {
        let (logs, _guard) = capture_logs();
        let mediator = mediator_with(crate::Pipeline::new().with(LoggingBehavior));

        let mut violations = Violations::new();
        violations.require("name", "");
        let err = mediator
            .send(Echo::failing(MediatorError::validation(violations)), &RequestContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MediatorError::ValidationFailed(_)));

        let output = logs.contents();
        assert!(output.contains("request rejected"));
        assert!(!output.contains("ERROR"));
    }

    #[tokio::test]
    async fn unexpected_failures_are_logged_as_errors() {
        let (logs, _guard) = capture_logs();
        let mediator = mediator_with(crate::Pipeline::new().with(LoggingBehavior));

        mediator
            .send(
                Echo::failing(MediatorError::unexpected(anyhow::anyhow!("boom"))),
                &RequestContext::new(),
            )
            .await
            .unwrap_err();

        let output = logs.contents();
        assert!(output.contains("ERROR"));
        assert!(output.contains("request failed"));
    }
}
