//! Staging-to-destination finalization for bulk loads.
//!
//! Records are uploaded to a stage (for example an object store prefix) by an upstream writer.
//! At sync close, [`finalizer::StagingFinalizer`] copies the staged files of every stream into a
//! temporary table, merges them into the final tables according to each stream's
//! [`types::SyncMode`] inside one transaction, and then drops the temporary tables and,
//! optionally, the stages.
//!
//! Destinations plug in through [`staging::StagingOperations`].

pub mod error;
pub mod failpoints;
pub mod finalizer;
mod macros;
pub mod staging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
