use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::staging::StagingOperations;
use crate::types::{StreamId, WriteConfig};

/// Owned inputs of one copy of staged files into a temporary table.
#[derive(Debug, Clone)]
pub(crate) struct CopyJob {
    pub(crate) stream_id: StreamId,
    pub(crate) stage_name: String,
    pub(crate) staging_path: String,
    pub(crate) staged_files: Vec<String>,
    pub(crate) tmp_table_name: String,
    pub(crate) schema_name: String,
}

impl CopyJob {
    pub(crate) fn new(stage_name: String, staging_path: String, write_config: &WriteConfig) -> Self {
        Self {
            stream_id: write_config.stream_id().clone(),
            stage_name,
            staging_path,
            staged_files: write_config.staged_files().as_slice().to_vec(),
            tmp_table_name: write_config.tmp_table_name().to_string(),
            schema_name: write_config.output_schema_name().to_string(),
        }
    }
}

/// Window of in-flight copy tasks, consumed in the order they were spawned.
///
/// At most `capacity` copies run at once. Results are taken front to back, so the caller sees
/// them in stream order regardless of which copy finishes first.
pub(crate) struct CopyWindow<O> {
    ops: Arc<O>,
    capacity: usize,
    timeout: Option<Duration>,
    in_flight: VecDeque<JoinHandle<EtlResult<()>>>,
}

impl<O> CopyWindow<O>
where
    O: StagingOperations + Send + Sync + 'static,
{
    pub(crate) fn new(ops: Arc<O>, capacity: usize, timeout: Option<Duration>) -> Self {
        Self {
            ops,
            capacity: capacity.max(1),
            timeout,
            in_flight: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.in_flight.len() >= self.capacity
    }

    /// Spawns the copy at the back of the window.
    pub(crate) fn spawn(&mut self, job: CopyJob) {
        info!(
            stream = %job.stream_id,
            schema = %job.schema_name,
            tmp_table = %job.tmp_table_name,
            stage = %job.stage_name,
            staging_path = %job.staging_path,
            file_count = job.staged_files.len(),
            "copying staged files into temporary table"
        );
        debug!(stream = %job.stream_id, files = %job.staged_files.join(","), "staged files");

        let ops = Arc::clone(&self.ops);
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            let copy = ops.copy_into_tmp_table_from_stage(
                &job.stage_name,
                &job.staging_path,
                &job.staged_files,
                &job.tmp_table_name,
                &job.schema_name,
            );

            let Some(timeout) = timeout else {
                return copy.await;
            };

            match tokio::time::timeout(timeout, copy).await {
                Ok(result) => result,
                Err(_) => Err(etl_error!(
                    ErrorKind::StagingCopyTimeout,
                    "Copy of staged files timed out",
                    format!(
                        "copy of stream {} did not finish within {} ms",
                        job.stream_id,
                        timeout.as_millis()
                    )
                )),
            }
        });

        self.in_flight.push_back(handle);
    }

    /// Waits for the copy at the front of the window.
    ///
    /// Returns `None` if no copy is in flight.
    pub(crate) async fn next(&mut self) -> Option<EtlResult<()>> {
        let handle = self.in_flight.pop_front()?;

        let result = match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(etl_error!(
                ErrorKind::StagingCopyWorkerPanic,
                "Copy task panicked",
                join_err
            )),
        };

        Some(result)
    }

    /// Aborts every copy still in flight.
    pub(crate) fn abort_all(&mut self) {
        for handle in self.in_flight.drain(..) {
            handle.abort();
        }
    }
}

impl<O> Drop for CopyWindow<O> {
    fn drop(&mut self) {
        for handle in self.in_flight.drain(..) {
            handle.abort();
        }
    }
}
