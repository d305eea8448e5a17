use async_trait::async_trait;
use thiserror::Error;

use dbets_core::TransactionStateError;
use dbets_mediator::MediatorError;

/// Errors raised by a database backend.
///
/// ## Error Categories
///
/// - **Connection**: the backend could not hand out a connection (pool closed, timeout, refused)
/// - **UniqueViolation**: a write conflicted with a unique constraint
/// - **Serialization**: a stored value could not be encoded or decoded
/// - **Operation**: any other failure of a named operation (`begin`, `commit`, `put`, ...)
/// - **Poisoned**: an in-process lock was poisoned by a panicking writer
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("connection unavailable: {0}")]
    Connection(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("{operation} failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },

    #[error("storage lock poisoned")]
    Poisoned,
}

impl DatabaseError {
    pub fn operation(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Operation {
            operation,
            message: message.into(),
        }
    }
}

/// Errors returned by `UnitOfWork`.
#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    #[error(transparent)]
    State(#[from] TransactionStateError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("operation cancelled")]
    Cancelled,

    /// An earlier `{operation}` never completed; its outcome is unknown and the connection
    /// holding the transaction was discarded.
    #[error("{operation} was interrupted; the transaction was discarded")]
    Interrupted { operation: &'static str },
}

impl From<UnitOfWorkError> for MediatorError {
    fn from(value: UnitOfWorkError) -> Self {
        match value {
            UnitOfWorkError::State(e) => MediatorError::TransactionState(e),
            UnitOfWorkError::Database(e) => MediatorError::unexpected(e),
            UnitOfWorkError::Cancelled => MediatorError::Cancelled,
            interrupted @ UnitOfWorkError::Interrupted { .. } => {
                MediatorError::unexpected(interrupted)
            }
        }
    }
}

impl From<DatabaseError> for MediatorError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::UniqueViolation(msg) => {
                MediatorError::Domain(dbets_core::DomainError::conflict(msg))
            }
            other => MediatorError::unexpected(other),
        }
    }
}

/// Transactional storage backend used by a unit of work.
///
/// A backend hands out connections and runs transaction control statements on them. It
/// never tracks transaction state itself: `UnitOfWork` owns that state machine and
/// guarantees `commit`/`rollback` are only called with the transaction `begin` returned.
///
/// ## Resource Release
///
/// `commit` and `rollback` take the transaction **by value**, so the transaction is
/// released whether or not the statement succeeds. `abandon` is the synchronous escape
/// hatch for a connection whose transaction state is open or unknown: a unit of work
/// dropped mid-transaction, or a control statement whose future was dropped before it
/// completed. The backend must make sure nothing on that connection can be committed
/// afterwards.
#[async_trait]
pub trait Database: Send + Sync + 'static {
    type Connection: Send;
    type Transaction: Send;

    /// Backend name for logs.
    fn name(&self) -> &'static str;

    async fn connect(&self) -> Result<Self::Connection, DatabaseError>;

    async fn begin(&self, conn: &mut Self::Connection) -> Result<Self::Transaction, DatabaseError>;

    async fn commit(
        &self,
        conn: &mut Self::Connection,
        tx: Self::Transaction,
    ) -> Result<(), DatabaseError>;

    async fn rollback(
        &self,
        conn: &mut Self::Connection,
        tx: Self::Transaction,
    ) -> Result<(), DatabaseError>;

    fn abandon(&self, conn: Self::Connection);
}
