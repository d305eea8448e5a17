//! Handler registry (request type → handler factory).
//!
//! Registration happens once, at startup, through [`RegistryBuilder`]. `build()` freezes the
//! mappings into an immutable [`HandlerRegistry`] that is shared read-only by every
//! concurrent dispatch, so lookups never take a lock.
//!
//! ## Policies
//!
//! - **Requests**: exactly one handler per request type. Registering a second handler for
//!   the same type replaces the first (last registration wins) and logs a warning.
//! - **Notifications**: handlers accumulate; `resolve_notification_handlers` returns them in
//!   registration order. An empty result is not an error.
//! - **Factories** are invoked once per dispatch. Registering an instance shares it across
//!   dispatches; registering a factory gives each dispatch a fresh handler (for handlers
//!   holding request-scoped state such as a unit of work).

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::MediatorError;
use crate::handler::{
    ErasedNotificationHandler, ErasedRequestHandler, NotificationHandler,
    NotificationHandlerAdapter, RequestHandler, RequestHandlerAdapter,
};
use crate::request::{Notification, Request};

/// Produces the handler for one request type.
#[derive(Clone)]
pub struct HandlerFactory {
    request_type: &'static str,
    handler_type: &'static str,
    create: Arc<dyn Fn() -> Arc<dyn ErasedRequestHandler> + Send + Sync>,
}

impl HandlerFactory {
    pub fn request_type(&self) -> &'static str {
        self.request_type
    }

    pub fn handler_type(&self) -> &'static str {
        self.handler_type
    }

    pub(crate) fn create(&self) -> Arc<dyn ErasedRequestHandler> {
        (self.create)()
    }
}

impl core::fmt::Debug for HandlerFactory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerFactory")
            .field("request_type", &self.request_type)
            .field("handler_type", &self.handler_type)
            .finish_non_exhaustive()
    }
}

/// Produces one listener for a notification type.
#[derive(Clone)]
pub struct NotificationHandlerFactory {
    handler_type: &'static str,
    create: Arc<dyn Fn() -> Arc<dyn ErasedNotificationHandler> + Send + Sync>,
}

impl NotificationHandlerFactory {
    pub fn handler_type(&self) -> &'static str {
        self.handler_type
    }

    pub(crate) fn create(&self) -> Arc<dyn ErasedNotificationHandler> {
        (self.create)()
    }
}

impl core::fmt::Debug for NotificationHandlerFactory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NotificationHandlerFactory")
            .field("handler_type", &self.handler_type)
            .finish_non_exhaustive()
    }
}

/// Identifies a request type for startup validation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    type_id: TypeId,
    type_name: &'static str,
}

impl RequestDescriptor {
    pub fn of<R: Request>() -> Self {
        Self {
            type_id: TypeId::of::<R>(),
            type_name: core::any::type_name::<R>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// Mutable registration phase.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    requests: HashMap<TypeId, HandlerFactory>,
    notifications: HashMap<TypeId, Vec<NotificationHandlerFactory>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared handler instance for `R`.
    pub fn register<R, H>(self, handler: H) -> Self
    where
        R: Request,
        H: RequestHandler<R>,
    {
        let shared: Arc<dyn ErasedRequestHandler> =
            Arc::new(RequestHandlerAdapter::<R, H>::new(handler));
        self.insert_request::<R>(
            core::any::type_name::<H>(),
            Arc::new(move || shared.clone()),
        )
    }

    /// Register a factory producing a fresh handler for every dispatch of `R`.
    pub fn register_factory<R, H, F>(self, factory: F) -> Self
    where
        R: Request,
        H: RequestHandler<R>,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.insert_request::<R>(
            core::any::type_name::<H>(),
            Arc::new(move || {
                Arc::new(RequestHandlerAdapter::<R, H>::new(factory()))
                    as Arc<dyn ErasedRequestHandler>
            }),
        )
    }

    /// Append a shared listener for `N`.
    pub fn register_notification_handler<N, H>(self, handler: H) -> Self
    where
        N: Notification,
        H: NotificationHandler<N>,
    {
        let shared: Arc<dyn ErasedNotificationHandler> =
            Arc::new(NotificationHandlerAdapter::<N, H>::new(handler));
        self.insert_notification::<N>(
            core::any::type_name::<H>(),
            Arc::new(move || shared.clone()),
        )
    }

    /// Append a listener for `N` created fresh on every publish.
    pub fn register_notification_factory<N, H, F>(self, factory: F) -> Self
    where
        N: Notification,
        H: NotificationHandler<N>,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.insert_notification::<N>(
            core::any::type_name::<H>(),
            Arc::new(move || {
                Arc::new(NotificationHandlerAdapter::<N, H>::new(factory()))
                    as Arc<dyn ErasedNotificationHandler>
            }),
        )
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            requests: self.requests,
            notifications: self.notifications,
        }
    }

    fn insert_request<R: Request>(
        mut self,
        handler_type: &'static str,
        create: Arc<dyn Fn() -> Arc<dyn ErasedRequestHandler> + Send + Sync>,
    ) -> Self {
        let factory = HandlerFactory {
            request_type: core::any::type_name::<R>(),
            handler_type,
            create,
        };

        if let Some(previous) = self.requests.insert(TypeId::of::<R>(), factory) {
            tracing::warn!(
                request_type = previous.request_type,
                replaced = previous.handler_type,
                handler = handler_type,
                "request handler registered twice; keeping the last registration"
            );
        }
        self
    }

    fn insert_notification<N: Notification>(
        mut self,
        handler_type: &'static str,
        create: Arc<dyn Fn() -> Arc<dyn ErasedNotificationHandler> + Send + Sync>,
    ) -> Self {
        self.notifications
            .entry(TypeId::of::<N>())
            .or_default()
            .push(NotificationHandlerFactory {
                handler_type,
                create,
            });
        self
    }
}

/// Immutable request/notification → handler mappings.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    requests: HashMap<TypeId, HandlerFactory>,
    notifications: HashMap<TypeId, Vec<NotificationHandlerFactory>>,
}

impl HandlerRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Factory for the handler of `R`, or `HandlerNotFound`.
    pub fn resolve<R: Request>(&self) -> Result<&HandlerFactory, MediatorError> {
        self.requests
            .get(&TypeId::of::<R>())
            .ok_or(MediatorError::HandlerNotFound {
                request_type: core::any::type_name::<R>(),
            })
    }

    /// Listeners of `N` in registration order (possibly none).
    pub fn resolve_notification_handlers<N: Notification>(&self) -> &[NotificationHandlerFactory] {
        self.notifications
            .get(&TypeId::of::<N>())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains<R: Request>(&self) -> bool {
        self.requests.contains_key(&TypeId::of::<R>())
    }

    /// Startup check for a single request type.
    pub fn ensure_registered<R: Request>(&self) -> Result<(), MediatorError> {
        self.resolve::<R>().map(|_| ())
    }

    /// Names of the request types in `required` that have no handler.
    pub fn missing(&self, required: &[RequestDescriptor]) -> Vec<&'static str> {
        required
            .iter()
            .filter(|d| !self.requests.contains_key(&d.type_id))
            .map(|d| d.type_name)
            .collect()
    }

    /// `(request type, handler type)` pairs, sorted by request type.
    pub fn registrations(&self) -> Vec<(&'static str, &'static str)> {
        let mut out: Vec<_> = self
            .requests
            .values()
            .map(|f| (f.request_type, f.handler_type))
            .collect();
        out.sort_unstable();
        out
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }
}
