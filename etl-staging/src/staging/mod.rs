//! Capability interface between the finalizer and a destination, plus an in-memory implementation.

mod base;
pub mod memory;

use chrono::{DateTime, Utc};

pub use base::StagingOperations;

use crate::types::ConnectionId;

/// Builds the `{stage}/{YYYY}/{MM}/{DD}/{HH}/{connection_id}/` layout used for staged files.
///
/// Scoping by hour and connection id keeps files of concurrent syncs apart.
pub fn dated_staging_path(
    stage_name: &str,
    connection_id: ConnectionId,
    write_datetime: DateTime<Utc>,
) -> String {
    format!(
        "{}/{}/{connection_id}/",
        stage_name.trim_end_matches('/'),
        write_datetime.format("%Y/%m/%d/%H")
    )
}
