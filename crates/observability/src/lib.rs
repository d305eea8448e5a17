//! Process-wide tracing setup.
//!
//! The composition root (a binary's `main`, or a test harness assembling the app) calls
//! [`init`] once at startup, before building the `Mediator`, so the spans and events emitted
//! by the pipeline and the unit of work reach a subscriber. Library crates only emit through
//! `tracing` and never install a subscriber themselves.
//!
//! ```no_run
//! fn main() {
//!     dbets_observability::init();
//!     // build the registry, pipeline and mediator here
//! }
//! ```

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, output format).
pub mod tracing;
