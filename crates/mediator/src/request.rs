use std::time::Duration;

/// Whether a request changes state (command) or only reads it (query).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Command,
    Query,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Command => "command",
            RequestKind::Query => "query",
        }
    }
}

/// A command or query routed to exactly one handler (request abstraction).
///
/// Requests represent **intent** - a single operation the caller wants performed,
/// carrying all of its input data. They are **transient**: created by the caller,
/// consumed once by dispatch and discarded when the call returns.
///
/// ## Request vs Notification
///
/// - **Request**: Intent to do something, one handler, one result (e.g. "Create user")
/// - **Notification**: Fact that something happened, zero or more listeners (e.g. "UserRegistered")
///
/// ## Handler Resolution
///
/// A request is routed by its **exact runtime type**. There is no fallback to a handler
/// registered for a related type; a missing registration is a configuration error
/// (`MediatorError::HandlerNotFound`).
///
/// ## Commands and Queries
///
/// Requests are commands unless `kind()` says otherwise. Only queries are eligible for
/// result caching; a query's cache key defaults to its `Debug` rendering, so two queries
/// with equal content share one cache entry. Override `cache_key()` when `Debug` includes
/// data that should not be part of the key. Keys are always scoped by the request type.
///
/// ## Design Constraints
///
/// Requests must be:
/// - **Debug**: Requests appear in logs and cache keys
/// - **Send + Sync**: Requests cross await points and may be inspected by every behavior
/// - **'static**: Requests own all of their data
///
/// Responses must be `Clone` so a cached query result can be handed out more than once.
pub trait Request: core::fmt::Debug + Send + Sync + 'static {
    type Response: Clone + Send + Sync + 'static;

    fn kind(&self) -> RequestKind {
        RequestKind::Command
    }

    /// Cache key for a query result. Ignored for commands.
    fn cache_key(&self) -> Option<String> {
        match self.kind() {
            RequestKind::Query => Some(format!("{self:?}")),
            RequestKind::Command => None,
        }
    }

    /// Per-request cache lifetime; `None` uses the configured default.
    fn cache_ttl(&self) -> Option<Duration> {
        None
    }
}

/// A fact broadcast to zero or more independent handlers (notification abstraction).
///
/// Notifications are **immutable** (treat them as facts). They are typically created by a
/// command handler after a successful commit and published through the handler context.
/// A notification type with no registered handlers is silently dropped.
pub trait Notification: core::fmt::Debug + Send + Sync + 'static {}
