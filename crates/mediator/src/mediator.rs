//! Request dispatch and notification broadcast.
//!
//! ## Send
//!
//! ```text
//! send(request, ctx)
//!   ↓
//! 1. Check cancellation
//!   ↓
//! 2. Resolve the handler factory by exact request type (HandlerNotFound → stop, no behavior runs)
//!   ↓
//! 3. Wrap the request in an envelope and run the pipeline; the last `next` invokes the handler
//!   ↓
//! 4. Downcast the response back to `R::Response`
//! ```
//!
//! ## Publish
//!
//! Every listener registered for the notification type is invoked sequentially, in
//! registration order, with the same notification and context. A failing listener does
//! not prevent later listeners from running; all failures are reported together as
//! `NotificationHandlersFailed`. Cancellation stops the broadcast before the next listener;
//! failures collected up to that point are still reported, with the skipped count.
//! Publish does not run the request pipeline.

use std::sync::Arc;

use tracing::Instrument;

use crate::context::RequestContext;
use crate::envelope::{RequestEnvelope, downcast_response, short_type_name};
use crate::error::{MediatorError, NotificationFailures, NotificationHandlerFailure};
use crate::handler::{ErasedRequestHandler, HandlerContext};
use crate::pipeline::Pipeline;
use crate::registry::{HandlerRegistry, NotificationHandlerFactory};
use crate::request::{Notification, Request};

/// Single entry point for commands, queries and notifications.
///
/// Stateless apart from its immutable registry and pipeline, so one instance (usually
/// behind an `Arc`) serves any number of concurrent dispatches.
#[derive(Debug)]
pub struct Mediator {
    registry: Arc<HandlerRegistry>,
    pipeline: Pipeline,
}

impl Mediator {
    pub fn new(registry: impl Into<Arc<HandlerRegistry>>, pipeline: Pipeline) -> Self {
        let registry = registry.into();
        tracing::info!(
            handlers = registry.request_count(),
            behaviors = ?pipeline.names(),
            "mediator ready"
        );
        Self { registry, pipeline }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Route `request` to its handler through every pipeline behavior.
    pub async fn send<R: Request>(
        &self,
        request: R,
        ctx: &RequestContext,
    ) -> Result<R::Response, MediatorError> {
        ctx.ensure_not_cancelled()?;

        let handler = self.registry.resolve::<R>()?.create();
        let handler: &dyn ErasedRequestHandler = handler.as_ref();
        let terminal =
            move |envelope: RequestEnvelope| handler.handle(envelope, HandlerContext::new(ctx, self));

        let response = self
            .pipeline
            .run(RequestEnvelope::new(request), ctx, &terminal)
            .await?;

        downcast_response::<R>(response)
    }

    /// Broadcast `notification` to every registered listener.
    pub async fn publish<N: Notification>(
        &self,
        notification: N,
        ctx: &RequestContext,
    ) -> Result<(), MediatorError> {
        let notification_type = short_type_name(core::any::type_name::<N>());
        let handlers = self.registry.resolve_notification_handlers::<N>();

        if handlers.is_empty() {
            tracing::debug!(notification_type, "no listeners registered; notification dropped");
            return Ok(());
        }

        let span = tracing::info_span!(
            "mediator.publish",
            notification_type,
            correlation_id = %ctx.correlation_id(),
            listeners = handlers.len(),
        );

        self.broadcast(notification_type, handlers, &notification, ctx)
            .instrument(span)
            .await
    }

    async fn broadcast<N: Notification>(
        &self,
        notification_type: &'static str,
        handlers: &[NotificationHandlerFactory],
        notification: &N,
        ctx: &RequestContext,
    ) -> Result<(), MediatorError> {
        let mut failures = Vec::new();
        let mut attempted = 0;
        let mut skipped = 0;

        for (position, factory) in handlers.iter().enumerate() {
            if ctx.is_cancelled() {
                skipped = handlers.len() - attempted;
                tracing::info!(attempted, skipped, "publish cancelled");
                break;
            }

            attempted += 1;
            let listener = factory.create();
            match listener
                .handle(notification, HandlerContext::new(ctx, self))
                .await
            {
                Ok(()) => {
                    tracing::debug!(position, listener = factory.handler_type(), "listener completed");
                }
                Err(error) => {
                    tracing::error!(
                        position,
                        listener = factory.handler_type(),
                        error = %error,
                        "notification listener failed"
                    );
                    failures.push(NotificationHandlerFailure {
                        position,
                        handler: factory.handler_type(),
                        error,
                    });
                }
            }
        }

        // Failures already collected outrank the cancellation.
        match (failures.is_empty(), skipped) {
            (true, 0) => Ok(()),
            (true, _) => Err(MediatorError::Cancelled),
            (false, _) => Err(NotificationFailures {
                notification_type,
                attempted,
                skipped,
                failures,
            }
            .into()),
        }
    }
}
