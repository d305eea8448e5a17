//! Unit of work (one connection, at most one active transaction).
//!
//! ## State Machine
//!
//! ```text
//!            begin()                 commit() / rollback()
//!   Idle ────────────────▶ Active ─────────────────────────▶ Idle
//!    │                       │
//!    │ commit()/rollback()   │ begin()
//!    ▼                       ▼
//!  NoActiveTransaction     TransactionAlreadyActive
//! ```
//!
//! There is no terminal state: a unit of work can run any number of successive
//! transactions on the same connection. The connection is opened lazily by the first
//! `begin()` (or `connection()`) and returned to the pool when the unit of work is dropped.
//!
//! ## Ownership
//!
//! A unit of work is request-scoped and exclusively owned by the operation that created it;
//! the `&mut self` receivers make concurrent use impossible.
//!
//! ## Failure Policy
//!
//! Command handlers wrap `begin … commit` and call [`UnitOfWork::rollback_after`] on any
//! failure. It rolls back only if a transaction is still active and reports a failing
//! rollback alongside the triggering error, never in place of it.
//!
//! ## Cancellation
//!
//! `begin` and `commit` refuse to start once the operation is cancelled (the transaction
//! stays active so the caller can roll it back); `rollback` always proceeds.
//!
//! A dispatch future may also be dropped while a control statement is awaiting the backend
//! (timeouts, `select!`). The unit of work marks each statement in flight before awaiting
//! it, so an interrupted statement still counts as active: dropping the unit of work
//! abandons the connection, and the next call on it discards the connection before doing
//! anything else.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryConnection, InMemoryDatabase, InMemoryStats};
pub use postgres::PostgresDatabase;
pub use r#trait::{Database, DatabaseError, UnitOfWorkError};

use tokio_util::sync::CancellationToken;

use dbets_core::TransactionStateError;
use dbets_mediator::MediatorError;

pub struct UnitOfWork<D: Database> {
    db: D,
    connection: Option<D::Connection>,
    transaction: Option<D::Transaction>,
    /// Control statement awaiting the backend. Still set after the call means it was
    /// interrupted.
    in_flight: Option<&'static str>,
}

impl<D: Database> UnitOfWork<D> {
    pub fn new(db: D) -> Self {
        Self {
            db,
            connection: None,
            transaction: None,
            in_flight: None,
        }
    }

    /// A transaction is open, or a control statement was interrupted and its outcome is
    /// unknown.
    pub fn is_active(&self) -> bool {
        self.transaction.is_some() || self.in_flight.is_some()
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    /// The underlying connection, opened on first use.
    ///
    /// Repositories take it to run their statements inside the active transaction.
    pub async fn connection(&mut self) -> Result<&mut D::Connection, UnitOfWorkError> {
        if let Some(operation) = self.discard_interrupted() {
            return Err(UnitOfWorkError::Interrupted { operation });
        }
        let conn = match self.connection.take() {
            Some(conn) => conn,
            None => {
                tracing::debug!(backend = self.db.name(), "opening connection");
                self.db.connect().await?
            }
        };
        Ok(self.connection.insert(conn))
    }

    /// Start a transaction. Fails with `TransactionAlreadyActive` while one is open.
    ///
    /// After an interrupted statement the stale connection is discarded and the new
    /// transaction starts on a fresh one.
    pub async fn begin(&mut self, cancellation: &CancellationToken) -> Result<(), UnitOfWorkError> {
        self.discard_interrupted();
        if self.transaction.is_some() {
            return Err(TransactionStateError::TransactionAlreadyActive.into());
        }
        if cancellation.is_cancelled() {
            return Err(UnitOfWorkError::Cancelled);
        }

        let db = &self.db;
        let conn = match self.connection.take() {
            Some(conn) => conn,
            None => db.connect().await?,
        };
        let conn = self.connection.insert(conn);

        self.in_flight = Some("begin");
        let started = db.begin(conn).await;
        self.in_flight = None;
        self.transaction = Some(started?);

        tracing::debug!(backend = self.db.name(), "transaction started");
        Ok(())
    }

    /// Commit the active transaction. Fails with `NoActiveTransaction` when idle.
    ///
    /// The transaction is released even if the commit statement fails.
    pub async fn commit(&mut self, cancellation: &CancellationToken) -> Result<(), UnitOfWorkError> {
        if let Some(operation) = self.discard_interrupted() {
            return Err(UnitOfWorkError::Interrupted { operation });
        }
        if self.transaction.is_none() {
            return Err(TransactionStateError::NoActiveTransaction.into());
        }
        if cancellation.is_cancelled() {
            return Err(UnitOfWorkError::Cancelled);
        }

        let (conn, tx) = take_active(&mut self.connection, &mut self.transaction)?;
        self.in_flight = Some("commit");
        let committed = self.db.commit(conn, tx).await;
        self.in_flight = None;

        match committed {
            Ok(()) => {
                tracing::debug!(backend = self.db.name(), "transaction committed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(backend = self.db.name(), error = %e, "commit failed");
                Err(e.into())
            }
        }
    }

    /// Roll back the active transaction. Fails with `NoActiveTransaction` when idle.
    ///
    /// The transaction is released even if the rollback statement fails. After an
    /// interrupted statement, discarding the connection is the rollback.
    pub async fn rollback(&mut self) -> Result<(), UnitOfWorkError> {
        if self.discard_interrupted().is_some() {
            return Ok(());
        }

        let (conn, tx) = take_active(&mut self.connection, &mut self.transaction)?;
        self.in_flight = Some("rollback");
        let rolled_back = self.db.rollback(conn, tx).await;
        self.in_flight = None;

        rolled_back?;
        tracing::debug!(backend = self.db.name(), "transaction rolled back");
        Ok(())
    }

    /// Failure path of a guarded region.
    ///
    /// Rolls back if a transaction is active and returns `cause`. If the rollback itself
    /// fails, both are reported as `RollbackFailed` with `cause` as the primary error.
    pub async fn rollback_after(&mut self, cause: impl Into<MediatorError>) -> MediatorError {
        let cause = cause.into();
        if !self.is_active() {
            return cause;
        }

        match self.rollback().await {
            Ok(()) => cause,
            Err(rollback) => {
                tracing::error!(
                    backend = self.db.name(),
                    error = %cause,
                    rollback_error = %rollback,
                    "rollback failed after error"
                );
                MediatorError::RollbackFailed {
                    original: Box::new(cause),
                    rollback: rollback.to_string(),
                }
            }
        }
    }

    /// Throw away the connection of an interrupted control statement.
    fn discard_interrupted(&mut self) -> Option<&'static str> {
        let operation = self.in_flight.take()?;
        self.transaction = None;
        tracing::warn!(
            backend = self.db.name(),
            operation,
            "transaction statement was interrupted; discarding its connection"
        );
        if let Some(conn) = self.connection.take() {
            self.db.abandon(conn);
        }
        Some(operation)
    }
}

fn take_active<'a, C, T>(
    connection: &'a mut Option<C>,
    transaction: &mut Option<T>,
) -> Result<(&'a mut C, T), UnitOfWorkError> {
    match (connection.as_mut(), transaction.take()) {
        (Some(conn), Some(tx)) => Ok((conn, tx)),
        _ => Err(TransactionStateError::NoActiveTransaction.into()),
    }
}

impl<D: Database> Drop for UnitOfWork<D> {
    fn drop(&mut self) {
        if !self.is_active() {
            return;
        }
        tracing::warn!(
            backend = self.db.name(),
            interrupted = self.in_flight,
            "unit of work dropped with an active transaction; discarding it"
        );
        self.transaction = None;
        self.in_flight = None;
        if let Some(conn) = self.connection.take() {
            self.db.abandon(conn);
        }
    }
}

impl<D: Database> core::fmt::Debug for UnitOfWork<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("backend", &self.db.name())
            .field("connected", &self.has_connection())
            .field("active", &self.is_active())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}
