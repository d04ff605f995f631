//! Close handler that finalizes staged data and cleans up after it.

mod cleanup;
mod copy;
mod core;
mod statements;

pub use cleanup::{CleanupArtifact, CleanupFailure, CleanupReport};
pub use self::core::{FinalizerConfig, StagingFinalizer};
pub use statements::stream_statements;
