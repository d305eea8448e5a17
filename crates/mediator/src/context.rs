//! Per-operation dispatch context.

use tokio_util::sync::CancellationToken;

use dbets_core::CorrelationId;

use crate::error::MediatorError;

/// Caller-supplied context for one logical operation.
///
/// Every `send`/`publish` carries one. It threads the correlation identifier (for logs and
/// error reports) and the cancellation signal through the whole pipeline, into handler
/// bodies and from there into unit-of-work calls.
///
/// Cloning is cheap; clones share the same cancellation token.
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: CorrelationId,
    cancellation: CancellationToken,
}

impl RequestContext {
    /// Fresh context with a new correlation id and a token nobody cancels.
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            cancellation,
        }
    }

    /// Keep an upstream correlation id (e.g. one received from the HTTP boundary).
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// `Err(Cancelled)` once the operation has been cancelled.
    pub fn ensure_not_cancelled(&self) -> Result<(), MediatorError> {
        if self.is_cancelled() {
            return Err(MediatorError::Cancelled);
        }
        Ok(())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_cancellation() {
        let ctx = RequestContext::new();
        let clone = ctx.clone();
        assert!(clone.ensure_not_cancelled().is_ok());

        ctx.cancellation().cancel();
        assert!(clone.is_cancelled());
        assert!(matches!(clone.ensure_not_cancelled(), Err(MediatorError::Cancelled)));
        assert_eq!(ctx.correlation_id(), clone.correlation_id());
    }

    #[test]
    fn upstream_correlation_id_is_kept() {
        let id = CorrelationId::new();
        let ctx = RequestContext::new().with_correlation_id(id);
        assert_eq!(ctx.correlation_id(), id);
    }
}
