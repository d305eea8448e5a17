//! `dbets-mediator`: in-process request/notification dispatch.
//!
//! Callers hand a request (command or query) to the [`Mediator`]; it finds the single
//! handler registered for the request's exact type, runs the request through an ordered
//! pipeline of cross-cutting behaviors and returns the handler's response. Notifications are
//! broadcast to every registered listener, with failures isolated per listener.
//!
//! ## Module Layout
//!
//! - `request`: [`Request`] / [`Notification`] contracts
//! - `handler`: [`RequestHandler`] / [`NotificationHandler`] and the [`HandlerContext`]
//! - `registry`: startup-time registration, frozen into an immutable [`HandlerRegistry`]
//! - `pipeline`: [`PipelineBehavior`] and the [`Next`] continuation
//! - `behaviors`: the standard behaviors (exception translation, logging, performance,
//!   caching, validation)
//! - `config`: [`PipelineConfig`] loaded from the environment
//! - `error`: [`MediatorError`] and its serialisable [`Failure`] view

pub mod behaviors;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod mediator;
pub mod pipeline;
pub mod registry;
pub mod request;

pub use behaviors::{
    CachingBehavior, ExceptionTranslationBehavior, InMemoryQueryCache, LoggingBehavior,
    PerformanceBehavior, QueryCache, ValidationBehavior, Validator, ValidatorSet,
    standard_pipeline,
};
pub use config::{BehaviorKind, ConfigError, PipelineConfig};
pub use context::RequestContext;
pub use envelope::{ErasedResponse, RequestEnvelope};
pub use error::{
    ErrorKind, Failure, MediatorError, NotificationFailures, NotificationHandlerFailure,
};
pub use handler::{HandlerContext, NotificationHandler, RequestHandler};
pub use mediator::Mediator;
pub use pipeline::{BoxFuture, DispatchResult, Next, Pipeline, PipelineBehavior};
pub use registry::{
    HandlerFactory, HandlerRegistry, NotificationHandlerFactory, RegistryBuilder,
    RequestDescriptor,
};
pub use request::{Notification, Request, RequestKind};

// Handlers implement the async traits with this attribute.
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
