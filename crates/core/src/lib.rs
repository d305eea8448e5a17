//! `dbets-core`: foundation primitives shared by the dispatch core.
//!
//! This crate contains **pure** building blocks (no IO, no async): identifiers,
//! the domain error model and field-level validation.

pub mod error;
pub mod id;
pub mod validation;

pub use error::{DomainError, DomainResult, TransactionStateError};
pub use id::{CorrelationId, UserId};
pub use validation::{Violation, Violations};
