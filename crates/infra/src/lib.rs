//! Infrastructure layer: unit of work, database backends, configuration.
//!
//! ## Module Layout
//!
//! - `unit_of_work`: the [`UnitOfWork`] transaction state machine and the [`Database`]
//!   backends it drives (in-memory and Postgres)
//! - `config`: [`DatabaseConfig`] loaded from the environment
//! - `integration_tests`: end-to-end scenarios through the mediator pipeline

pub mod config;
pub mod unit_of_work;

pub use config::DatabaseConfig;
pub use unit_of_work::{
    Database, DatabaseError, InMemoryConnection, InMemoryDatabase, InMemoryStats,
    PostgresDatabase, UnitOfWork, UnitOfWorkError,
};
