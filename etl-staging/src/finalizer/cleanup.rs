use std::fmt;

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::types::StreamId;

/// Durable artifact the cleanup phase is responsible for removing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupArtifact {
    TmpTable { schema: String, table: String },
    Stage { name: String },
}

impl fmt::Display for CleanupArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupArtifact::TmpTable { schema, table } => {
                write!(f, "temporary table {schema}.{table}")
            }
            CleanupArtifact::Stage { name } => write!(f, "stage {name}"),
        }
    }
}

/// A cleanup step that failed for one stream.
#[derive(Debug, Clone)]
pub struct CleanupFailure {
    pub stream_id: StreamId,
    pub artifact: CleanupArtifact,
    pub error: EtlError,
}

/// Outcome of the cleanup phase.
///
/// Cleanup is best-effort per stream, so failures are collected here instead of being
/// propagated.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub(crate) fn record(&mut self, stream_id: StreamId, artifact: CleanupArtifact, error: EtlError) {
        self.failures.push(CleanupFailure {
            stream_id,
            artifact,
            error,
        });
    }

    /// Returns `true` if every artifact was removed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[CleanupFailure] {
        &self.failures
    }

    /// Aggregates every failure into one [`EtlError`] of kind [`ErrorKind::StageCleanupFailed`].
    pub fn into_result(self) -> EtlResult<()> {
        if self.failures.is_empty() {
            return Ok(());
        }

        let errors = self
            .failures
            .into_iter()
            .map(|failure| {
                etl_error!(
                    ErrorKind::StageCleanupFailed,
                    "Failed to clean up staging artifact",
                    format!("{} of stream {}", failure.artifact, failure.stream_id),
                    source: failure.error
                )
            })
            .collect::<Vec<_>>();

        Err(errors.into())
    }
}
