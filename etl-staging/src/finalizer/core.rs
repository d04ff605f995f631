use etl_config::shared::StagingConfig;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::bail;
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::failpoints::{
    CLEANUP__BEFORE_DROP_TMP_TABLE, FINALIZE__BEFORE_TRANSACTION, etl_fail_point,
};
use crate::finalizer::cleanup::{CleanupArtifact, CleanupReport};
use crate::finalizer::copy::{CopyJob, CopyWindow};
use crate::finalizer::statements::stream_statements;
use crate::staging::StagingOperations;
use crate::types::{ConnectionId, WriteConfig};

/// Tuning of a [`StagingFinalizer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizerConfig {
    /// Whether the stage of every stream is dropped during cleanup.
    pub purge_staging_data: bool,
    /// Maximum number of copies into temporary tables running at once.
    pub max_concurrent_copies: usize,
    /// Maximum duration of one copy into a temporary table.
    pub copy_timeout: Option<Duration>,
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        Self {
            purge_staging_data: true,
            max_concurrent_copies: 1,
            copy_timeout: None,
        }
    }
}

impl From<&StagingConfig> for FinalizerConfig {
    fn from(config: &StagingConfig) -> Self {
        Self {
            purge_staging_data: config.purge_staging_data,
            max_concurrent_copies: config.max_concurrent_copies,
            copy_timeout: config.copy_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Close handler turning the staged files of a sync into final table contents.
///
/// [`StagingFinalizer::close`] runs two phases:
///
/// 1. Finalization, skipped when upstream processing already failed. Staged files of every
///    stream are copied into the stream's temporary table, the final tables are created if
///    missing, and the sync-mode statements of all streams run as one transaction.
/// 2. Cleanup, always. Temporary tables are dropped and, when purging, stages too. Each stream
///    is cleaned up independently and failures end up in the returned [`CleanupReport`].
///
/// A failing copy aborts finalization right away and removes that stream's staged files from
/// the stage. Statements are never executed piecemeal, so final tables either reflect every
/// stream or none.
#[derive(Debug)]
pub struct StagingFinalizer<O> {
    ops: Arc<O>,
    connection_id: ConnectionId,
    write_configs: Vec<WriteConfig>,
    config: FinalizerConfig,
}

impl<O> StagingFinalizer<O>
where
    O: StagingOperations + Send + Sync + 'static,
{
    /// Creates a finalizer for the write configs of one sync.
    ///
    /// Fails if a write config is invalid, if two write configs target the same stream or if
    /// the config allows no copy to run.
    pub fn new(
        ops: O,
        connection_id: ConnectionId,
        write_configs: Vec<WriteConfig>,
        config: FinalizerConfig,
    ) -> EtlResult<Self> {
        if config.max_concurrent_copies == 0 {
            bail!(
                ErrorKind::ConfigError,
                "Invalid finalizer configuration",
                "max_concurrent_copies must be greater than zero"
            );
        }

        if config.copy_timeout.is_some_and(|timeout| timeout.is_zero()) {
            bail!(
                ErrorKind::ConfigError,
                "Invalid finalizer configuration",
                "copy_timeout must be greater than zero"
            );
        }

        let mut stream_ids = HashSet::with_capacity(write_configs.len());
        for write_config in &write_configs {
            write_config.validate()?;

            if !stream_ids.insert(write_config.stream_id()) {
                bail!(
                    ErrorKind::ValidationError,
                    "Duplicate stream in sync",
                    format!(
                        "stream {} has more than one write config",
                        write_config.stream_id()
                    )
                );
            }
        }

        Ok(Self {
            ops: Arc::new(ops),
            connection_id,
            write_configs,
            config,
        })
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn write_configs(&self) -> &[WriteConfig] {
        &self.write_configs
    }

    pub fn config(&self) -> &FinalizerConfig {
        &self.config
    }

    /// Finalizes the sync unless `has_failed` is set, then cleans up.
    ///
    /// Returns the error of the finalization phase, if any, after cleanup ran. Cleanup failures
    /// never turn into an error and are returned in the [`CleanupReport`].
    pub async fn close(&mut self, has_failed: bool) -> EtlResult<CleanupReport> {
        let result = if has_failed {
            warn!(
                stream_count = self.write_configs.len(),
                "upstream processing failed, skipping finalization"
            );
            Ok(())
        } else {
            self.finalize().await
        };

        if let Err(err) = &result {
            error!(error = %err, "finalization failed");
        }

        let report = self.clean_up().await;

        result.map(|_| report)
    }

    async fn finalize(&mut self) -> EtlResult<()> {
        info!(
            connection_id = %self.connection_id,
            stream_count = self.write_configs.len(),
            "starting finalization of staged data"
        );

        let mut statements = Vec::new();
        let mut window = CopyWindow::new(
            Arc::clone(&self.ops),
            self.config.max_concurrent_copies,
            self.config.copy_timeout,
        );
        let mut next_to_spawn = 0;

        for index in 0..self.write_configs.len() {
            while next_to_spawn < self.write_configs.len() && !window.is_full() {
                window.spawn(self.copy_job(next_to_spawn));
                next_to_spawn += 1;
            }

            let Some(result) = window.next().await else {
                bail!(
                    ErrorKind::InvalidState,
                    "Copy window is empty",
                    format!("no copy in flight for write config {index}")
                );
            };

            if let Err(err) = result {
                window.abort_all();
                return Err(self.handle_copy_failure(index, err).await);
            }

            let ops = Arc::clone(&self.ops);
            let write_config = &mut self.write_configs[index];

            let drained = write_config.drain_staged_files();
            info!(
                stream = %write_config.stream_id(),
                file_count = drained.len(),
                "copied staged files into temporary table"
            );

            ops.create_table_if_not_exists(
                write_config.output_schema_name(),
                write_config.output_table_name(),
            )
            .await?;

            info!(
                stream = %write_config.stream_id(),
                sync_mode = %write_config.sync_mode(),
                final_table = write_config.output_table_name(),
                "queueing statements for stream"
            );
            statements.extend(stream_statements(ops.as_ref(), write_config));
        }

        self.ops
            .on_destination_close_operations(&self.write_configs)
            .await?;

        etl_fail_point(FINALIZE__BEFORE_TRANSACTION)?;

        info!(
            statement_count = statements.len(),
            "executing finalization transaction"
        );

        if let Err(err) = self.ops.execute_transaction(statements).await {
            if err.kind() == ErrorKind::DestinationTransactionFailed {
                return Err(err);
            }

            return Err(etl_error!(
                ErrorKind::DestinationTransactionFailed,
                "Failed to execute finalization transaction",
                format!("transaction over {} streams failed", self.write_configs.len()),
                source: err
            ));
        }

        info!(
            stream_count = self.write_configs.len(),
            "finalization of staged data completed"
        );

        Ok(())
    }

    fn copy_job(&self, index: usize) -> CopyJob {
        let write_config = &self.write_configs[index];
        let (stage_name, staging_path) = self.stage_location(write_config);

        CopyJob::new(stage_name, staging_path, write_config)
    }

    fn stage_location(&self, write_config: &WriteConfig) -> (String, String) {
        let schema_name = write_config.output_schema_name();
        let stream_name = write_config.stream_name();

        let stage_name = self.ops.stage_name(schema_name, stream_name);
        let staging_path = self.ops.staging_path(
            self.connection_id,
            schema_name,
            stream_name,
            write_config.write_datetime(),
        );

        (stage_name, staging_path)
    }

    /// Removes the staged files of a stream whose copy failed and builds the error to return.
    async fn handle_copy_failure(
        &self,
        index: usize,
        err: EtlError,
    ) -> EtlError {
        let write_config = &self.write_configs[index];
        let (stage_name, staging_path) = self.stage_location(write_config);

        error!(
            stream = %write_config.stream_id(),
            stage = %stage_name,
            staging_path = %staging_path,
            error = %err,
            "failed to copy staged files, cleaning up stage"
        );

        if let Err(cleanup_err) = self
            .ops
            .clean_up_stage(
                &stage_name,
                &staging_path,
                write_config.staged_files().as_slice(),
            )
            .await
        {
            error!(
                stream = %write_config.stream_id(),
                stage = %stage_name,
                error = %cleanup_err,
                "failed to clean up stage after copy failure"
            );
        }

        etl_error!(
            ErrorKind::StagingCopyFailed,
            "Failed to upload data from stage",
            format!(
                "stream {} at staging path {}",
                write_config.stream_id(),
                staging_path
            ),
            source: err
        )
    }

    async fn clean_up(&self) -> CleanupReport {
        info!(
            stream_count = self.write_configs.len(),
            purge_staging_data = self.config.purge_staging_data,
            "cleaning up temporary tables and stages"
        );

        let mut report = CleanupReport::default();

        for write_config in &self.write_configs {
            let schema_name = write_config.output_schema_name();
            let tmp_table_name = write_config.tmp_table_name();

            if let Err(err) = self.drop_tmp_table(schema_name, tmp_table_name).await {
                warn!(
                    stream = %write_config.stream_id(),
                    schema = schema_name,
                    tmp_table = tmp_table_name,
                    error = %err,
                    "failed to drop temporary table"
                );
                report.record(
                    write_config.stream_id().clone(),
                    CleanupArtifact::TmpTable {
                        schema: schema_name.to_string(),
                        table: tmp_table_name.to_string(),
                    },
                    err,
                );
            }

            if !self.config.purge_staging_data {
                continue;
            }

            let stage_name = self
                .ops
                .stage_name(schema_name, write_config.stream_name());
            if let Err(err) = self.ops.drop_stage_if_exists(&stage_name).await {
                warn!(
                    stream = %write_config.stream_id(),
                    stage = %stage_name,
                    error = %err,
                    "failed to drop stage"
                );
                report.record(
                    write_config.stream_id().clone(),
                    CleanupArtifact::Stage { name: stage_name },
                    err,
                );
            }
        }

        if report.is_clean() {
            info!("cleanup completed");
        } else {
            warn!(
                failure_count = report.failures().len(),
                "cleanup completed with failures"
            );
        }

        report
    }

    async fn drop_tmp_table(&self, schema_name: &str, tmp_table_name: &str) -> EtlResult<()> {
        etl_fail_point(CLEANUP__BEFORE_DROP_TMP_TABLE)?;

        self.ops
            .drop_table_if_exists(schema_name, tmp_table_name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::memory::MemoryStagingOperations;
    use crate::types::{PrimaryKey, StreamId, SyncMode};

    fn write_config(name: &str) -> WriteConfig {
        WriteConfig::new(
            StreamId::new(None, name),
            "public",
            format!("_tmp_{name}"),
            name,
            SyncMode::Append,
            PrimaryKey::default(),
        )
    }

    #[test]
    fn config_maps_staging_config() {
        let staging = StagingConfig {
            purge_staging_data: false,
            max_concurrent_copies: 4,
            copy_timeout_ms: Some(1_500),
        };

        assert_eq!(
            FinalizerConfig::from(&staging),
            FinalizerConfig {
                purge_staging_data: false,
                max_concurrent_copies: 4,
                copy_timeout: Some(Duration::from_millis(1_500)),
            }
        );
    }

    #[test]
    fn rejects_duplicate_streams() {
        let err = StagingFinalizer::new(
            MemoryStagingOperations::new(),
            ConnectionId::random(),
            vec![write_config("users"), write_config("users")],
            FinalizerConfig::default(),
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = StagingFinalizer::new(
            MemoryStagingOperations::new(),
            ConnectionId::random(),
            vec![write_config("users")],
            FinalizerConfig {
                max_concurrent_copies: 0,
                ..FinalizerConfig::default()
            },
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[tokio::test]
    async fn empty_sync_executes_empty_transaction() {
        let ops = MemoryStagingOperations::new();
        let mut finalizer = StagingFinalizer::new(
            ops.clone(),
            ConnectionId::random(),
            vec![],
            FinalizerConfig::default(),
        )
        .unwrap();

        let report = finalizer.close(false).await.unwrap();

        assert!(report.is_clean());
        assert_eq!(ops.committed_transactions().await, vec![vec![]]);
    }
}
