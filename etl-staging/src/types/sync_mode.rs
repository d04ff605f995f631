use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ErrorKind, EtlError};
use crate::etl_error;

/// Policy governing how newly loaded data combines with existing destination data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Replaces the final table contents with the newly loaded data.
    Overwrite,
    /// Adds the newly loaded data to the final table.
    Append,
    /// Adds the newly loaded data and removes rows it supersedes by primary key.
    AppendDedup,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Overwrite => "overwrite",
            SyncMode::Append => "append",
            SyncMode::AppendDedup => "append_dedup",
        }
    }

    /// Returns `true` if this mode needs a primary key to work.
    pub fn requires_primary_key(&self) -> bool {
        matches!(self, SyncMode::AppendDedup)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = EtlError;

    /// Parses a sync mode, case-insensitively.
    ///
    /// Unrecognized values are configuration errors and are never retried.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(SyncMode::Overwrite),
            "append" => Ok(SyncMode::Append),
            "append_dedup" => Ok(SyncMode::AppendDedup),
            other => Err(etl_error!(
                ErrorKind::InvalidSyncMode,
                "Unrecognized sync mode",
                format!("'{other}' is not one of 'overwrite', 'append' or 'append_dedup'")
            )),
        }
    }
}
