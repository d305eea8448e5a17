use async_trait::async_trait;

use crate::context::RequestContext;
use crate::envelope::RequestEnvelope;
use crate::error::MediatorError;
use crate::pipeline::{DispatchResult, Next, PipelineBehavior};

/// Outermost behavior: turns unexpected failures into a uniform, sanitised error.
///
/// - `Unexpected` errors are logged at `error` with the request type, correlation id and the
///   full error chain, then replaced by `HandlerExecutionFailed` whose message only carries
///   the correlation id.
/// - `TransactionState` errors are programming errors: logged at `error`, passed through.
/// - Known kinds (`ValidationFailed`, `Domain`, `HandlerNotFound`, ...) and `Cancelled`
///   pass through unchanged.
/// - `RollbackFailed` keeps its shape; only the original error is translated.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExceptionTranslationBehavior;

impl ExceptionTranslationBehavior {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PipelineBehavior for ExceptionTranslationBehavior {
    fn name(&self) -> &'static str {
        "exception_translation"
    }

    async fn handle(
        &self,
        envelope: RequestEnvelope,
        ctx: &RequestContext,
        next: Next<'_>,
    ) -> DispatchResult {
        let request_type = envelope.request_type();
        next.run(envelope)
            .await
            .map_err(|err| translate(request_type, ctx, err))
    }
}

fn translate(request_type: &'static str, ctx: &RequestContext, err: MediatorError) -> MediatorError {
    match err {
        MediatorError::Unexpected(source) => {
            tracing::error!(
                request_type,
                correlation_id = %ctx.correlation_id(),
                error = ?source,
                "unhandled error while handling request"
            );
            MediatorError::HandlerExecutionFailed {
                request_type,
                message: format!(
                    "an unexpected error occurred (correlation id {})",
                    ctx.correlation_id()
                ),
            }
        }
        MediatorError::TransactionState(state) => {
            tracing::error!(
                request_type,
                correlation_id = %ctx.correlation_id(),
                error = %state,
                "transaction state violated"
            );
            MediatorError::TransactionState(state)
        }
        MediatorError::RollbackFailed { original, rollback } => {
            tracing::error!(
                request_type,
                correlation_id = %ctx.correlation_id(),
                rollback = %rollback,
                "rollback failed"
            );
            MediatorError::RollbackFailed {
                original: Box::new(translate(request_type, ctx, *original)),
                rollback,
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use dbets_core::{DomainError, TransactionStateError};

    use super::*;
    use crate::error::ErrorKind;

    fn ctx() -> RequestContext {
        RequestContext::new()
    }

    #[test]
    fn unexpected_becomes_handler_execution_failed() {
        let ctx = ctx();
        let err = translate(
            "app::CreateUser",
            &ctx,
            MediatorError::unexpected(anyhow::anyhow!("password hasher exploded")),
        );

        assert_eq!(err.kind(), ErrorKind::HandlerExecutionFailed);
        let text = err.to_string();
        assert!(!text.contains("hasher"));
        assert!(text.contains(&ctx.correlation_id().to_string()));
    }

    #[test]
    fn known_kinds_pass_through() {
        let ctx = ctx();
        let err = translate(
            "app::CreateUser",
            &ctx,
            MediatorError::from(DomainError::conflict("email already registered")),
        );
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = translate("app::CreateUser", &ctx, MediatorError::Cancelled);
        assert!(err.is_cancelled());

        let err = translate(
            "app::CreateUser",
            &ctx,
            MediatorError::from(TransactionStateError::NoActiveTransaction),
        );
        assert_eq!(err.kind(), ErrorKind::TransactionState);
    }

    #[test]
    fn rollback_failure_translates_only_the_original() {
        let ctx = ctx();
        let err = translate(
            "app::CreateUser",
            &ctx,
            MediatorError::RollbackFailed {
                original: Box::new(MediatorError::unexpected(anyhow::anyhow!("disk full"))),
                rollback: "connection reset".to_string(),
            },
        );

        match err {
            MediatorError::RollbackFailed { original, rollback } => {
                assert_eq!(original.kind(), ErrorKind::HandlerExecutionFailed);
                assert_eq!(rollback, "connection reset");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
