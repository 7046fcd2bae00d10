//! Tarmac Core
//!
//! Core types and abstractions for the Tarmac job scheduling system.
//!
//! This crate contains:
//! - Domain types: Core business entities (Job, RunnerSession, log records, events)
//! - DTOs: Data transfer objects for inter-service communication
//! - The shared error taxonomy and the optimistic-version primitive

pub mod domain;
pub mod dto;
pub mod error;
pub mod version;

pub use error::{Error, Result};
