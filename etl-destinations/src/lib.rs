//! Destinations that finalize staged files.
//!
//! Each destination implements [`etl_staging::staging::StagingOperations`] and is enabled by a
//! cargo feature of the same name.

#[cfg(feature = "redshift")]
pub mod redshift;
