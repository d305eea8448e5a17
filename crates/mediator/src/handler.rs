use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use dbets_core::CorrelationId;

use crate::context::RequestContext;
use crate::envelope::{ErasedResponse, RequestEnvelope};
use crate::error::MediatorError;
use crate::mediator::Mediator;
use crate::request::{Notification, Request};

/// Handles one request type and produces its response (terminal handler abstraction).
///
/// The handler is the innermost stage of the pipeline: it performs the actual business
/// operation. Exactly one handler is registered per request type.
///
/// ## Transactions
///
/// Command handlers own their unit of work: they call begin/commit themselves and are
/// responsible for rolling back on **any** failure inside the guarded region. The mediator
/// never rolls back on a handler's behalf.
///
/// ## Publishing
///
/// Notifications are published through `ctx.publish()` **after** a successful commit, so
/// listeners never run while a transaction is held open.
///
/// ## Errors
///
/// Return `MediatorError::Domain` / `ValidationFailed` for expected outcomes and
/// `MediatorError::Unexpected` (any `anyhow` error via `?`) for faults; the
/// exception-translation behavior sanitises the latter.
#[async_trait]
pub trait RequestHandler<R: Request>: Send + Sync + 'static {
    async fn handle(
        &self,
        request: R,
        ctx: &HandlerContext<'_>,
    ) -> Result<R::Response, MediatorError>;
}

/// Reacts to a notification (listener abstraction).
///
/// Listeners are independent: a failing listener does not stop the others, and it does not
/// undo the change that produced the notification.
#[async_trait]
pub trait NotificationHandler<N: Notification>: Send + Sync + 'static {
    async fn handle(&self, notification: &N, ctx: &HandlerContext<'_>)
    -> Result<(), MediatorError>;
}

/// What a handler sees of the current operation.
///
/// Gives access to the correlation id and cancellation token of the dispatch, and lets the
/// handler publish notifications (or send follow-up requests) through the same mediator
/// and the same request context.
#[derive(Clone, Copy)]
pub struct HandlerContext<'a> {
    request: &'a RequestContext,
    mediator: &'a Mediator,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(request: &'a RequestContext, mediator: &'a Mediator) -> Self {
        Self { request, mediator }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.request.correlation_id()
    }

    pub fn cancellation(&self) -> &'a CancellationToken {
        self.request.cancellation()
    }

    pub fn request_context(&self) -> &'a RequestContext {
        self.request
    }

    pub fn ensure_not_cancelled(&self) -> Result<(), MediatorError> {
        self.request.ensure_not_cancelled()
    }

    /// Broadcast a notification to its listeners, in registration order.
    pub async fn publish<N: Notification>(&self, notification: N) -> Result<(), MediatorError> {
        self.mediator.publish(notification, self.request).await
    }

    /// Dispatch a nested request through the full pipeline.
    pub async fn send<R: Request>(&self, request: R) -> Result<R::Response, MediatorError> {
        self.mediator.send(request, self.request).await
    }
}

impl core::fmt::Debug for HandlerContext<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("request", self.request)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub(crate) trait ErasedRequestHandler: Send + Sync {
    async fn handle(
        &self,
        envelope: RequestEnvelope,
        ctx: HandlerContext<'_>,
    ) -> Result<ErasedResponse, MediatorError>;
}

pub(crate) struct RequestHandlerAdapter<R, H> {
    handler: H,
    _request: PhantomData<fn(R)>,
}

impl<R, H> RequestHandlerAdapter<R, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _request: PhantomData,
        }
    }
}

#[async_trait]
impl<R, H> ErasedRequestHandler for RequestHandlerAdapter<R, H>
where
    R: Request,
    H: RequestHandler<R>,
{
    async fn handle(
        &self,
        envelope: RequestEnvelope,
        ctx: HandlerContext<'_>,
    ) -> Result<ErasedResponse, MediatorError> {
        let request = envelope.into_request::<R>().map_err(|env| {
            MediatorError::unexpected(anyhow::anyhow!(
                "handler for `{}` received `{}`",
                core::any::type_name::<R>(),
                env.request_type()
            ))
        })?;

        let response = self.handler.handle(request, &ctx).await?;
        Ok(Arc::new(response))
    }
}

#[async_trait]
pub(crate) trait ErasedNotificationHandler: Send + Sync {
    async fn handle(
        &self,
        notification: &(dyn Any + Send + Sync),
        ctx: HandlerContext<'_>,
    ) -> Result<(), MediatorError>;
}

pub(crate) struct NotificationHandlerAdapter<N, H> {
    handler: H,
    _notification: PhantomData<fn(N)>,
}

impl<N, H> NotificationHandlerAdapter<N, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _notification: PhantomData,
        }
    }
}

#[async_trait]
impl<N, H> ErasedNotificationHandler for NotificationHandlerAdapter<N, H>
where
    N: Notification,
    H: NotificationHandler<N>,
{
    async fn handle(
        &self,
        notification: &(dyn Any + Send + Sync),
        ctx: HandlerContext<'_>,
    ) -> Result<(), MediatorError> {
        let notification = notification.downcast_ref::<N>().ok_or_else(|| {
            MediatorError::unexpected(anyhow::anyhow!(
                "listener for `{}` received a different notification type",
                core::any::type_name::<N>()
            ))
        })?;

        self.handler.handle(notification, &ctx).await
    }
}
