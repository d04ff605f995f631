use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::staging::StagingOperations;
use crate::types::{ConnectionId, PrimaryKey, WriteConfig};

/// Action methods of [`StagingOperations`] that faults can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagingOperation {
    CopyIntoTmpTable,
    CreateTableIfNotExists,
    DropTableIfExists,
    DropStageIfExists,
    CleanUpStage,
    ExecuteTransaction,
    OnDestinationCloseOperations,
}

/// A recorded call to an action method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagingCall {
    CopyIntoTmpTable {
        stage_name: String,
        staging_path: String,
        staged_files: Vec<String>,
        tmp_table_name: String,
    },
    CreateTableIfNotExists {
        table_name: String,
    },
    DropTableIfExists {
        table_name: String,
    },
    DropStageIfExists {
        stage_name: String,
    },
    CleanUpStage {
        stage_name: String,
        staging_path: String,
        staged_files: Vec<String>,
    },
    ExecuteTransaction {
        statements: Vec<String>,
    },
    OnDestinationCloseOperations {
        stream_count: usize,
    },
}

#[derive(Debug, Clone)]
enum FaultAction {
    Fail,
    Delay(Duration),
    Panic,
}

#[derive(Debug, Clone)]
struct Fault {
    operation: StagingOperation,
    /// Table or stage name the fault applies to, `None` for every call.
    target: Option<String>,
    action: FaultAction,
    /// Remaining number of triggers, `None` for unlimited.
    remaining: Option<usize>,
}

impl Fault {
    fn matches(&self, operation: StagingOperation, target: &str) -> bool {
        self.operation == operation
            && self.remaining != Some(0)
            && self.target.as_deref().is_none_or(|t| t == target)
    }
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<StagingCall>,
    faults: Vec<Fault>,
    copies_in_flight: usize,
    max_copies_in_flight: usize,
}

/// Test wrapper for [`StagingOperations`] implementations that records calls and injects faults.
///
/// Every action method call is recorded as a [`StagingCall`] before it reaches the wrapped
/// implementation. Faults registered with [`FaultyStagingOperations::fail_on`],
/// [`FaultyStagingOperations::delay_on`] and [`FaultyStagingOperations::panic_on`] are matched
/// by operation and by table or stage name.
#[derive(Debug, Clone)]
pub struct FaultyStagingOperations<O> {
    wrapped: O,
    inner: Arc<RwLock<Inner>>,
}

impl<O> FaultyStagingOperations<O>
where
    O: Clone,
{
    pub fn wrap(ops: O) -> Self {
        Self {
            wrapped: ops,
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Makes every matching call fail. A `None` target matches any table or stage.
    pub async fn fail_on(&self, operation: StagingOperation, target: Option<&str>) {
        self.add_fault(operation, target, FaultAction::Fail, None)
            .await;
    }

    /// Makes only the first matching call fail.
    pub async fn fail_once_on(&self, operation: StagingOperation, target: Option<&str>) {
        self.add_fault(operation, target, FaultAction::Fail, Some(1))
            .await;
    }

    /// Delays every matching call before it reaches the wrapped implementation.
    pub async fn delay_on(
        &self,
        operation: StagingOperation,
        target: Option<&str>,
        delay: Duration,
    ) {
        self.add_fault(operation, target, FaultAction::Delay(delay), None)
            .await;
    }

    /// Panics in the first matching call.
    pub async fn panic_on(&self, operation: StagingOperation, target: Option<&str>) {
        self.add_fault(operation, target, FaultAction::Panic, Some(1))
            .await;
    }

    /// Returns every recorded call in call order.
    pub async fn calls(&self) -> Vec<StagingCall> {
        self.inner.read().await.calls.clone()
    }

    /// Returns the recorded calls of one operation.
    pub async fn calls_of(&self, operation: StagingOperation) -> Vec<StagingCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|call| call_operation(call) == operation)
            .collect()
    }

    /// Returns the highest number of copies that were running at the same time.
    pub async fn max_copies_in_flight(&self) -> usize {
        self.inner.read().await.max_copies_in_flight
    }

    pub fn wrapped(&self) -> &O {
        &self.wrapped
    }

    async fn add_fault(
        &self,
        operation: StagingOperation,
        target: Option<&str>,
        action: FaultAction,
        remaining: Option<usize>,
    ) {
        let mut inner = self.inner.write().await;
        inner.faults.push(Fault {
            operation,
            target: target.map(ToString::to_string),
            action,
            remaining,
        });
    }

    /// Records the call and applies matching faults.
    async fn before(
        &self,
        operation: StagingOperation,
        target: &str,
        call: StagingCall,
    ) -> EtlResult<()> {
        let actions = {
            let mut inner = self.inner.write().await;
            inner.calls.push(call);

            let mut actions = Vec::new();
            for fault in inner.faults.iter_mut() {
                if fault.matches(operation, target) {
                    if let Some(remaining) = fault.remaining.as_mut() {
                        *remaining -= 1;
                    }
                    actions.push(fault.action.clone());
                }
            }

            actions
        };

        for action in &actions {
            if let FaultAction::Delay(delay) = action {
                tokio::time::sleep(*delay).await;
            }
        }

        for action in actions {
            match action {
                FaultAction::Fail => return Err(injected_error(operation, target)),
                FaultAction::Panic => panic!("injected panic in {operation:?} on {target}"),
                FaultAction::Delay(_) => {}
            }
        }

        Ok(())
    }
}

fn injected_error(operation: StagingOperation, target: &str) -> EtlError {
    etl_error!(
        ErrorKind::DestinationIoError,
        "Injected staging failure",
        format!("{operation:?} on {target}")
    )
}

fn call_operation(call: &StagingCall) -> StagingOperation {
    match call {
        StagingCall::CopyIntoTmpTable { .. } => StagingOperation::CopyIntoTmpTable,
        StagingCall::CreateTableIfNotExists { .. } => StagingOperation::CreateTableIfNotExists,
        StagingCall::DropTableIfExists { .. } => StagingOperation::DropTableIfExists,
        StagingCall::DropStageIfExists { .. } => StagingOperation::DropStageIfExists,
        StagingCall::CleanUpStage { .. } => StagingOperation::CleanUpStage,
        StagingCall::ExecuteTransaction { .. } => StagingOperation::ExecuteTransaction,
        StagingCall::OnDestinationCloseOperations { .. } => {
            StagingOperation::OnDestinationCloseOperations
        }
    }
}

impl<O> StagingOperations for FaultyStagingOperations<O>
where
    O: StagingOperations + Clone + Send + Sync,
{
    type Statement = O::Statement;

    fn name() -> &'static str {
        "faulty"
    }

    fn stage_name(&self, schema_name: &str, stream_name: &str) -> String {
        self.wrapped.stage_name(schema_name, stream_name)
    }

    fn staging_path(
        &self,
        connection_id: ConnectionId,
        schema_name: &str,
        stream_name: &str,
        write_datetime: DateTime<Utc>,
    ) -> String {
        self.wrapped
            .staging_path(connection_id, schema_name, stream_name, write_datetime)
    }

    async fn copy_into_tmp_table_from_stage(
        &self,
        stage_name: &str,
        staging_path: &str,
        staged_files: &[String],
        tmp_table_name: &str,
        schema_name: &str,
    ) -> EtlResult<()> {
        {
            let mut inner = self.inner.write().await;
            inner.copies_in_flight += 1;
            inner.max_copies_in_flight = inner.max_copies_in_flight.max(inner.copies_in_flight);
        }

        let result = async {
            self.before(
                StagingOperation::CopyIntoTmpTable,
                tmp_table_name,
                StagingCall::CopyIntoTmpTable {
                    stage_name: stage_name.to_string(),
                    staging_path: staging_path.to_string(),
                    staged_files: staged_files.to_vec(),
                    tmp_table_name: tmp_table_name.to_string(),
                },
            )
            .await?;

            self.wrapped
                .copy_into_tmp_table_from_stage(
                    stage_name,
                    staging_path,
                    staged_files,
                    tmp_table_name,
                    schema_name,
                )
                .await
        }
        .await;

        self.inner.write().await.copies_in_flight -= 1;

        result
    }

    async fn create_table_if_not_exists(&self, schema_name: &str, table_name: &str) -> EtlResult<()> {
        self.before(
            StagingOperation::CreateTableIfNotExists,
            table_name,
            StagingCall::CreateTableIfNotExists {
                table_name: table_name.to_string(),
            },
        )
        .await?;

        self.wrapped
            .create_table_if_not_exists(schema_name, table_name)
            .await
    }

    async fn drop_table_if_exists(&self, schema_name: &str, table_name: &str) -> EtlResult<()> {
        self.before(
            StagingOperation::DropTableIfExists,
            table_name,
            StagingCall::DropTableIfExists {
                table_name: table_name.to_string(),
            },
        )
        .await?;

        self.wrapped.drop_table_if_exists(schema_name, table_name).await
    }

    async fn drop_stage_if_exists(&self, stage_name: &str) -> EtlResult<()> {
        self.before(
            StagingOperation::DropStageIfExists,
            stage_name,
            StagingCall::DropStageIfExists {
                stage_name: stage_name.to_string(),
            },
        )
        .await?;

        self.wrapped.drop_stage_if_exists(stage_name).await
    }

    async fn clean_up_stage(
        &self,
        stage_name: &str,
        staging_path: &str,
        staged_files: &[String],
    ) -> EtlResult<()> {
        self.before(
            StagingOperation::CleanUpStage,
            stage_name,
            StagingCall::CleanUpStage {
                stage_name: stage_name.to_string(),
                staging_path: staging_path.to_string(),
                staged_files: staged_files.to_vec(),
            },
        )
        .await?;

        self.wrapped
            .clean_up_stage(stage_name, staging_path, staged_files)
            .await
    }

    fn truncate_table_query(&self, schema_name: &str, table_name: &str) -> Self::Statement {
        self.wrapped
            .truncate_table_query(schema_name, table_name)
    }

    fn copy_table_query(
        &self,
        schema_name: &str,
        src_table_name: &str,
        dst_table_name: &str,
    ) -> Self::Statement {
        self.wrapped
            .copy_table_query(schema_name, src_table_name, dst_table_name)
    }

    fn dedup_copy_table_query(
        &self,
        schema_name: &str,
        src_table_name: &str,
        dst_table_name: &str,
        primary_key: &PrimaryKey,
    ) -> Option<Self::Statement> {
        self.wrapped.dedup_copy_table_query(
            schema_name,
            src_table_name,
            dst_table_name,
            primary_key,
        )
    }

    fn delete_from_table_query(
        &self,
        schema_name: &str,
        src_table_name: &str,
        dst_table_name: &str,
        primary_key: &PrimaryKey,
    ) -> Self::Statement {
        self.wrapped.delete_from_table_query(
            schema_name,
            src_table_name,
            dst_table_name,
            primary_key,
        )
    }

    fn case_sensitive_identifiers_query(&self, enabled: bool) -> Option<Self::Statement> {
        self.wrapped
            .case_sensitive_identifiers_query(enabled)
    }

    async fn execute_transaction(&self, statements: Vec<Self::Statement>) -> EtlResult<()> {
        self.before(
            StagingOperation::ExecuteTransaction,
            "",
            StagingCall::ExecuteTransaction {
                statements: statements.iter().map(ToString::to_string).collect(),
            },
        )
        .await?;

        self.wrapped.execute_transaction(statements).await
    }

    async fn on_destination_close_operations(&self, write_configs: &[WriteConfig]) -> EtlResult<()> {
        self.before(
            StagingOperation::OnDestinationCloseOperations,
            "",
            StagingCall::OnDestinationCloseOperations {
                stream_count: write_configs.len(),
            },
        )
        .await?;

        self.wrapped.on_destination_close_operations(write_configs).await
    }
}
