//! Dispatch error model.
//!
//! Every error leaving the mediator carries a stable [`ErrorKind`] plus a message, and
//! converts into a serialisable [`Failure`] so an outer boundary (HTTP, CLI, ...) can map
//! it to a response without matching on internals.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dbets_core::{DomainError, TransactionStateError, Violations};

/// Stable, serialisable classification of a [`MediatorError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    HandlerNotFound,
    ValidationFailed,
    TransactionState,
    NotFound,
    Conflict,
    InvariantViolation,
    InvalidId,
    Unauthorized,
    HandlerExecutionFailed,
    NotificationHandlerFailed,
    Cancelled,
    Unexpected,
}

/// Error returned by `Mediator::send` / `Mediator::publish` and by handlers.
///
/// ## Error Categories
///
/// - **Configuration**: `HandlerNotFound` (no handler registered for the request type)
/// - **Expected**: `ValidationFailed`, `Domain` (returned to the caller, not logged as errors)
/// - **Programming errors**: `TransactionState` (begin/commit/rollback misuse)
/// - **Faults**: `Unexpected` (raw, from a handler) and `HandlerExecutionFailed`
///   (the same fault after the exception-translation behavior sanitised it)
/// - **Publish**: `NotificationHandlersFailed` aggregates every failing listener
/// - **Control**: `Cancelled`
///
/// `RollbackFailed` keeps the triggering error primary and reports the rollback failure
/// alongside it; its `kind()` is the kind of the original error.
#[derive(Debug, Error)]
pub enum MediatorError {
    #[error("no handler registered for request type `{request_type}`")]
    HandlerNotFound { request_type: &'static str },

    #[error("validation failed: {0}")]
    ValidationFailed(Violations),

    #[error("transaction state error: {0}")]
    TransactionState(#[from] TransactionStateError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("handler for `{request_type}` failed: {message}")]
    HandlerExecutionFailed {
        request_type: &'static str,
        message: String,
    },

    #[error(transparent)]
    NotificationHandlersFailed(#[from] NotificationFailures),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{original} (rollback also failed: {rollback})")]
    RollbackFailed {
        original: Box<MediatorError>,
        rollback: String,
    },

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl MediatorError {
    pub fn validation(violations: impl Into<Violations>) -> Self {
        Self::ValidationFailed(violations.into())
    }

    pub fn unexpected(err: impl Into<anyhow::Error>) -> Self {
        Self::Unexpected(err.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MediatorError::HandlerNotFound { .. } => ErrorKind::HandlerNotFound,
            MediatorError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            MediatorError::TransactionState(_) => ErrorKind::TransactionState,
            MediatorError::Domain(e) => match e {
                DomainError::InvariantViolation(_) => ErrorKind::InvariantViolation,
                DomainError::InvalidId(_) => ErrorKind::InvalidId,
                DomainError::NotFound(_) => ErrorKind::NotFound,
                DomainError::Conflict(_) => ErrorKind::Conflict,
                DomainError::Unauthorized => ErrorKind::Unauthorized,
            },
            MediatorError::HandlerExecutionFailed { .. } => ErrorKind::HandlerExecutionFailed,
            MediatorError::NotificationHandlersFailed(_) => ErrorKind::NotificationHandlerFailed,
            MediatorError::Cancelled => ErrorKind::Cancelled,
            MediatorError::RollbackFailed { original, .. } => original.kind(),
            MediatorError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Expected outcomes are reported to the caller but never logged as errors.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            MediatorError::ValidationFailed(_) | MediatorError::Domain(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            MediatorError::Cancelled => true,
            MediatorError::RollbackFailed { original, .. } => original.is_cancelled(),
            _ => false,
        }
    }

    pub fn violations(&self) -> Option<&Violations> {
        match self {
            MediatorError::ValidationFailed(v) => Some(v),
            MediatorError::RollbackFailed { original, .. } => original.violations(),
            _ => None,
        }
    }

    /// Structured, boundary-safe view of this error.
    ///
    /// Raw `Unexpected` errors are reported with a generic message; their details stay in
    /// the logs.
    ///
    /// Listener failures are described by their own sanitised messages, and a failed
    /// rollback is flagged on the original error's failure.
    pub fn to_failure(&self) -> Failure {
        let message = match self {
            MediatorError::Unexpected(_) => UNEXPECTED_MESSAGE.to_string(),
            MediatorError::RollbackFailed { original, .. } => {
                let mut failure = original.to_failure();
                failure.rollback_failed = true;
                return failure;
            }
            MediatorError::NotificationHandlersFailed(aggregate) => aggregate.sanitised_message(),
            other => other.to_string(),
        };

        Failure {
            kind: self.kind(),
            message,
            violations: self.violations().cloned().unwrap_or_default(),
            rollback_failed: false,
        }
    }
}

const UNEXPECTED_MESSAGE: &str = "an unexpected error occurred";

/// Serialisable failure result handed to the outer boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Violations::is_empty")]
    pub violations: Violations,
    /// The transaction could not be rolled back after this failure.
    #[serde(default, skip_serializing_if = "core::ops::Not::not")]
    pub rollback_failed: bool,
}

/// One listener that failed during `publish`.
#[derive(Debug)]
pub struct NotificationHandlerFailure {
    /// Registration position of the handler (0-based).
    pub position: usize,
    /// Type name of the handler.
    pub handler: &'static str,
    pub error: MediatorError,
}

/// Aggregate of every listener failure from one `publish` call.
#[derive(Debug)]
pub struct NotificationFailures {
    pub notification_type: &'static str,
    /// Number of handlers that were invoked.
    pub attempted: usize,
    /// Handlers never invoked because the operation was cancelled mid-broadcast.
    pub skipped: usize,
    pub failures: Vec<NotificationHandlerFailure>,
}

impl NotificationFailures {
    /// Summary safe to hand outside the process: no handler names, no raw error text.
    pub fn sanitised_message(&self) -> String {
        let mut message = self.summary();
        for failure in &self.failures {
            message.push_str(&format!(
                "; #{}: {}",
                failure.position,
                failure.error.to_failure().message
            ));
        }
        message
    }

    fn summary(&self) -> String {
        let mut summary = format!(
            "{} of {} handler(s) for `{}` failed",
            self.failures.len(),
            self.attempted,
            self.notification_type
        );
        if self.skipped > 0 {
            summary.push_str(&format!(" ({} skipped after cancellation)", self.skipped));
        }
        summary
    }
}

impl core::fmt::Display for NotificationFailures {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.summary())?;
        for failure in &self.failures {
            write!(
                f,
                "; #{} `{}`: {}",
                failure.position, failure.handler, failure.error
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for NotificationFailures {}
