//! Storage layer
//!
//! Stores are the only components that touch persisted Job, RunnerSession,
//! and LogRecord state; every mutation goes through their contracts so
//! version and size changes stay paired with the event publications the
//! service layer performs on top.
//!
//! All stores are trait-based, with a Postgres implementation for
//! production and an in-memory implementation (per-entity mutex) for tests
//! and embedded deployments.

mod jobs;
mod logs;
mod memory;
mod sessions;

// Re-export traits
pub use jobs::{JobFilter, JobStore};
pub use logs::LogStore;
pub use sessions::SessionStore;

// Re-export implementations
pub use jobs::PgJobStore;
pub use logs::PgLogStore;
pub use memory::{MemJobStore, MemLogStore, MemSessionStore};
pub use sessions::PgSessionStore;
