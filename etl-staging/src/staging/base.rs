use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;

use crate::error::EtlResult;
use crate::types::{ConnectionId, PrimaryKey, WriteConfig};

/// Capabilities a destination exposes to finalize staged data.
///
/// [`StagingOperations`] implementations own their database handle (a pool, a client, an in-memory
/// table set) so every method only needs `&self`. Methods fall in two groups:
///
/// - Action methods (copy, create, drop, clean up) execute immediately and may fail. They are not
///   assumed to be transactional.
/// - Query methods return a [`StagingOperations::Statement`] without executing it. Statements are
///   collected by the caller and executed together with [`StagingOperations::execute_transaction`],
///   which is the only method required to be atomic across its input.
///
/// Optional capabilities are part of the contract: [`StagingOperations::dedup_copy_table_query`]
/// and [`StagingOperations::case_sensitive_identifiers_query`] return `None` when the destination
/// has no such statement, in which case the caller falls back to the plain variants.
pub trait StagingOperations {
    /// Statement produced by the query methods and consumed by
    /// [`StagingOperations::execute_transaction`].
    type Statement: fmt::Display + fmt::Debug + Send + 'static;

    /// Returns the name of the destination.
    fn name() -> &'static str;

    /// Returns the stage holding the files of a stream.
    fn stage_name(&self, schema_name: &str, stream_name: &str) -> String;

    /// Returns the location inside the stage where the files of one sync are written.
    ///
    /// The `(connection_id, schema_name, stream_name, write_datetime)` tuple must map to a
    /// location no other sync writes to.
    fn staging_path(
        &self,
        connection_id: ConnectionId,
        schema_name: &str,
        stream_name: &str,
        write_datetime: DateTime<Utc>,
    ) -> String;

    /// Loads the given staged files into the temporary table, creating it if needed.
    ///
    /// An empty file list is valid and moves no data.
    fn copy_into_tmp_table_from_stage(
        &self,
        stage_name: &str,
        staging_path: &str,
        staged_files: &[String],
        tmp_table_name: &str,
        schema_name: &str,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Creates the table if it does not exist. An existing table is never altered.
    fn create_table_if_not_exists(
        &self,
        schema_name: &str,
        table_name: &str,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Drops the table. A missing table is not an error.
    fn drop_table_if_exists(
        &self,
        schema_name: &str,
        table_name: &str,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Drops the stage with everything it holds. A missing stage is not an error.
    fn drop_stage_if_exists(&self, stage_name: &str) -> impl Future<Output = EtlResult<()>> + Send;

    /// Removes the given staged files of one sync from the stage.
    ///
    /// Only objects under `staging_path` are touched, files of other syncs sharing the stage are
    /// kept even when their names match.
    fn clean_up_stage(
        &self,
        stage_name: &str,
        staging_path: &str,
        staged_files: &[String],
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Builds a statement removing every row of the table.
    fn truncate_table_query(&self, schema_name: &str, table_name: &str) -> Self::Statement;

    /// Builds a statement copying every row of `src_table_name` into `dst_table_name`.
    fn copy_table_query(
        &self,
        schema_name: &str,
        src_table_name: &str,
        dst_table_name: &str,
    ) -> Self::Statement;

    /// Builds a copy statement that inserts at most one row per primary key value.
    ///
    /// Of the rows sharing a key, the one loaded last into `src_table_name` is kept. Rows whose
    /// key has a null or missing field are all kept.
    ///
    /// Returns `None` if the destination has no such statement. The default implementation
    /// returns `None`.
    fn dedup_copy_table_query(
        &self,
        _schema_name: &str,
        _src_table_name: &str,
        _dst_table_name: &str,
        _primary_key: &PrimaryKey,
    ) -> Option<Self::Statement> {
        None
    }

    /// Builds a statement deleting the rows of `dst_table_name` whose primary key value also
    /// appears in `src_table_name`.
    fn delete_from_table_query(
        &self,
        schema_name: &str,
        src_table_name: &str,
        dst_table_name: &str,
        primary_key: &PrimaryKey,
    ) -> Self::Statement;

    /// Builds a statement switching case-sensitive identifier resolution on or off.
    ///
    /// Returns `None` if the destination needs no switch. The default implementation returns
    /// `None`.
    fn case_sensitive_identifiers_query(&self, _enabled: bool) -> Option<Self::Statement> {
        None
    }

    /// Executes all statements as one atomic unit.
    ///
    /// Either every statement takes effect or none does.
    fn execute_transaction(
        &self,
        statements: Vec<Self::Statement>,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Hook invoked once before the transaction is executed.
    ///
    /// The default implementation is a no-op.
    fn on_destination_close_operations(
        &self,
        _write_configs: &[WriteConfig],
    ) -> impl Future<Output = EtlResult<()>> + Send {
        async { Ok(()) }
    }
}
