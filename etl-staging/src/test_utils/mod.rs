//! Utilities for testing finalization against staging implementations.
//!
//! - [`faulty_staging`] wraps any [`crate::staging::StagingOperations`] to record calls and
//!   inject failures, delays or panics.
//! - [`fixtures`] builds write configs and records, and stages records in the in-memory
//!   implementation.
//! - [`failpoints`] scopes failpoint configuration to a single test.

pub mod failpoints;
pub mod faulty_staging;
pub mod fixtures;
