//! Postgres backend for the unit of work.
//!
//! Each unit of work holds one pooled connection and issues `BEGIN` / `COMMIT` / `ROLLBACK`
//! on it directly, so repositories running statements on [`UnitOfWork::connection`] take
//! part in the transaction without having to thread a `sqlx::Transaction` around.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | DatabaseError |
//! |------------|----------------------|---------------|
//! | Database (unique violation) | `23505` | `UniqueViolation` |
//! | Database (serialization failure) | `40001` | `Serialization` |
//! | Database (other) | Any other | `Operation` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Connection` |
//! | Other | N/A | `Operation` |
//!
//! ## Abandoned Transactions
//!
//! A unit of work dropped mid-transaction cannot run `ROLLBACK` (drop is synchronous), and a
//! `BEGIN`/`COMMIT`/`ROLLBACK` whose future was dropped leaves the session in an unknown
//! state. In both cases the connection is detached from the pool and closed, and the server
//! aborts any open transaction when the session ends. It never goes back to the pool in a
//! transaction.
//!
//! [`UnitOfWork::connection`]: super::UnitOfWork::connection

use std::time::Instant;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};
use tracing::instrument;

use super::r#trait::{Database, DatabaseError};
use crate::config::DatabaseConfig;

#[derive(Debug, Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
}

/// An open Postgres transaction on the unit of work's connection.
#[derive(Debug)]
pub struct PostgresTransaction {
    started: Instant,
}

impl PostgresDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool from configuration.
    ///
    /// The pool connects lazily; a bad URL or unreachable server surfaces on first use.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_lazy(&config.url)
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    type Connection = PoolConnection<Postgres>;
    type Transaction = PostgresTransaction;

    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn connect(&self) -> Result<Self::Connection, DatabaseError> {
        self.pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))
    }

    async fn begin(&self, conn: &mut Self::Connection) -> Result<Self::Transaction, DatabaseError> {
        execute(conn, "BEGIN").await?;
        Ok(PostgresTransaction {
            started: Instant::now(),
        })
    }

    async fn commit(
        &self,
        conn: &mut Self::Connection,
        tx: Self::Transaction,
    ) -> Result<(), DatabaseError> {
        execute(conn, "COMMIT").await?;
        tracing::debug!(elapsed_ms = tx.elapsed_ms(), "postgres commit");
        Ok(())
    }

    async fn rollback(
        &self,
        conn: &mut Self::Connection,
        tx: Self::Transaction,
    ) -> Result<(), DatabaseError> {
        execute(conn, "ROLLBACK").await?;
        tracing::debug!(elapsed_ms = tx.elapsed_ms(), "postgres rollback");
        Ok(())
    }

    fn abandon(&self, conn: Self::Connection) {
        tracing::warn!("closing connection with an open or unknown transaction state");
        drop(conn.detach());
    }
}

impl PostgresTransaction {
    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[instrument(skip(conn), err)]
async fn execute(
    conn: &mut PoolConnection<Postgres>,
    statement: &'static str,
) -> Result<(), DatabaseError> {
    sqlx::query(statement)
        .execute(&mut **conn)
        .await
        .map(|_| ())
        .map_err(|e| map_sqlx_error(statement, e))
}

fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> DatabaseError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => DatabaseError::UniqueViolation(msg),
                Some("40001") => DatabaseError::Serialization(msg),
                _ => DatabaseError::operation(operation, msg),
            }
        }
        sqlx::Error::PoolClosed => {
            DatabaseError::Connection(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            DatabaseError::Connection(format!("timed out acquiring a connection in {operation}"))
        }
        sqlx::Error::Io(e) => DatabaseError::Connection(format!("io error in {operation}: {e}")),
        other => DatabaseError::operation(operation, format!("sqlx error: {other}")),
    }
}
