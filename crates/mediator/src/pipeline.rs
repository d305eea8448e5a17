//! Request pipeline (cross-cutting behaviors wrapped around the handler).
//!
//! A [`Pipeline`] is an ordered list of [`PipelineBehavior`]s assembled once at startup.
//! For each dispatch the first behavior receives the request and a [`Next`] continuation;
//! calling `next.run()` invokes the following behavior, and the last `next` invokes the
//! handler:
//!
//! ```text
//! send(request)
//!   ↓
//! behavior[0] ── next ──▶ behavior[1] ── next ──▶ … ── next ──▶ handler
//!   ↑                                                            │
//!   └──────────────────────── response / error ◀─────────────────┘
//! ```
//!
//! Entry order equals registration order; exit order is the reverse. A behavior may
//! short-circuit by returning without calling `next` (validation rejecting a request,
//! caching serving a hit).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::envelope::{ErasedResponse, RequestEnvelope};
use crate::error::MediatorError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of one pipeline stage.
pub type DispatchResult = Result<ErasedResponse, MediatorError>;

pub(crate) type Terminal<'a> =
    dyn Fn(RequestEnvelope) -> BoxFuture<'a, DispatchResult> + Send + Sync + 'a;

/// Cross-cutting stage wrapping request handling (pipeline stage abstraction).
///
/// Behaviors apply to every request type. They must be stateless per request, or
/// internally synchronized, since one instance serves all concurrent dispatches.
#[async_trait]
pub trait PipelineBehavior: Send + Sync + 'static {
    /// Stable name used in configuration and startup logs.
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        envelope: RequestEnvelope,
        ctx: &RequestContext,
        next: Next<'_>,
    ) -> DispatchResult;
}

/// Continuation to the rest of the pipeline.
///
/// Consumed by `run`, so a behavior can invoke the remainder of the chain at most once.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn PipelineBehavior>],
    ctx: &'a RequestContext,
    terminal: &'a Terminal<'a>,
}

impl<'a> Next<'a> {
    pub fn run(self, envelope: RequestEnvelope) -> BoxFuture<'a, DispatchResult> {
        match self.remaining.split_first() {
            Some((behavior, rest)) => {
                let next = Next {
                    remaining: rest,
                    ctx: self.ctx,
                    terminal: self.terminal,
                };
                behavior.handle(envelope, self.ctx, next)
            }
            None => (self.terminal)(envelope),
        }
    }

    /// Behaviors still ahead of this point, excluding the handler.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

impl core::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.remaining.len())
            .finish_non_exhaustive()
    }
}

/// Ordered, immutable list of behaviors.
#[derive(Clone, Default)]
pub struct Pipeline {
    behaviors: Vec<Arc<dyn PipelineBehavior>>,
}

impl Pipeline {
    /// Empty pipeline: requests go straight to their handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a behavior (outermost first).
    pub fn with(mut self, behavior: impl PipelineBehavior) -> Self {
        self.behaviors.push(Arc::new(behavior));
        self
    }

    pub fn with_shared(mut self, behavior: Arc<dyn PipelineBehavior>) -> Self {
        self.behaviors.push(behavior);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.behaviors.iter().map(|b| b.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    pub(crate) fn run<'a>(
        &'a self,
        envelope: RequestEnvelope,
        ctx: &'a RequestContext,
        terminal: &'a Terminal<'a>,
    ) -> BoxFuture<'a, DispatchResult> {
        Next {
            remaining: &self.behaviors,
            ctx,
            terminal,
        }
        .run(envelope)
    }
}

impl core::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
