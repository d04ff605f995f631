use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::staging::{StagingOperations, dated_staging_path};
use crate::types::{ConnectionId, KeyPath, PrimaryKey};

/// Fully qualified table name used as key of the in-memory table set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct QualifiedTable {
    schema: String,
    table: String,
}

impl QualifiedTable {
    fn new(schema: &str, table: &str) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }
}

impl fmt::Display for QualifiedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Statement understood by [`MemoryStagingOperations::execute_transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryStatement {
    Truncate {
        schema: String,
        table: String,
    },
    Copy {
        schema: String,
        src_table: String,
        dst_table: String,
    },
    DedupCopy {
        schema: String,
        src_table: String,
        dst_table: String,
        primary_key: PrimaryKey,
    },
    DeleteByKey {
        schema: String,
        src_table: String,
        dst_table: String,
        primary_key: PrimaryKey,
    },
    CaseSensitiveIdentifiers(bool),
}

impl fmt::Display for MemoryStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryStatement::Truncate { schema, table } => write!(f, "TRUNCATE {schema}.{table}"),
            MemoryStatement::Copy {
                schema,
                src_table,
                dst_table,
            } => write!(f, "COPY {schema}.{src_table} INTO {schema}.{dst_table}"),
            MemoryStatement::DedupCopy {
                schema,
                src_table,
                dst_table,
                primary_key,
            } => write!(
                f,
                "DEDUP COPY {schema}.{src_table} INTO {schema}.{dst_table} BY {primary_key}"
            ),
            MemoryStatement::DeleteByKey {
                schema,
                src_table,
                dst_table,
                primary_key,
            } => write!(
                f,
                "DELETE FROM {schema}.{dst_table} USING {schema}.{src_table} BY {primary_key}"
            ),
            MemoryStatement::CaseSensitiveIdentifiers(enabled) => {
                write!(f, "SET CASE SENSITIVE IDENTIFIERS {enabled}")
            }
        }
    }
}

/// Table set that statements are applied to.
///
/// Transactions work on a clone which replaces the committed set only when every statement
/// succeeded.
#[derive(Debug, Clone, Default)]
struct TableSet {
    tables: HashMap<QualifiedTable, Vec<Value>>,
    case_sensitive_identifiers: bool,
}

impl TableSet {
    fn rows(&self, table: &QualifiedTable) -> EtlResult<&Vec<Value>> {
        self.tables.get(table).ok_or_else(|| {
            etl_error!(
                ErrorKind::DestinationTableMissing,
                "Table does not exist",
                table
            )
        })
    }

    fn rows_mut(&mut self, table: &QualifiedTable) -> EtlResult<&mut Vec<Value>> {
        self.tables.get_mut(table).ok_or_else(|| {
            etl_error!(
                ErrorKind::DestinationTableMissing,
                "Table does not exist",
                table
            )
        })
    }

    fn apply(
        &mut self,
        statement: &MemoryStatement,
        write_denied: &HashSet<QualifiedTable>,
    ) -> EtlResult<()> {
        if let Some(target) = statement_target(statement)
            && write_denied.contains(&target)
        {
            bail!(
                ErrorKind::PermissionDenied,
                "Write to table denied",
                format!("statement `{statement}` writes to {target}")
            );
        }

        match statement {
            MemoryStatement::Truncate { schema, table } => {
                self.rows_mut(&QualifiedTable::new(schema, table))?.clear();
            }
            MemoryStatement::Copy {
                schema,
                src_table,
                dst_table,
            } => {
                let rows = self.rows(&QualifiedTable::new(schema, src_table))?.clone();
                self.rows_mut(&QualifiedTable::new(schema, dst_table))?
                    .extend(rows);
            }
            MemoryStatement::DedupCopy {
                schema,
                src_table,
                dst_table,
                primary_key,
            } => {
                let src_rows = self.rows(&QualifiedTable::new(schema, src_table))?;

                // The last row of a key in load order wins.
                let mut last_index = HashMap::new();
                let mut keys = Vec::with_capacity(src_rows.len());
                for (index, row) in src_rows.iter().enumerate() {
                    let key = row_key(row, primary_key, self.case_sensitive_identifiers)?;
                    if let Some(key) = &key {
                        last_index.insert(key.clone(), index);
                    }
                    keys.push(key);
                }

                let rows = src_rows
                    .iter()
                    .zip(keys)
                    .enumerate()
                    .filter(|(index, (_, key))| match key {
                        Some(key) => last_index.get(key) == Some(index),
                        None => true,
                    })
                    .map(|(_, (row, _))| row.clone())
                    .collect::<Vec<_>>();

                self.rows_mut(&QualifiedTable::new(schema, dst_table))?
                    .extend(rows);
            }
            MemoryStatement::DeleteByKey {
                schema,
                src_table,
                dst_table,
                primary_key,
            } => {
                let case_sensitive = self.case_sensitive_identifiers;

                let mut src_keys = HashSet::new();
                for row in self.rows(&QualifiedTable::new(schema, src_table))? {
                    if let Some(key) = row_key(row, primary_key, case_sensitive)? {
                        src_keys.insert(key);
                    }
                }

                let dst_rows = self.rows_mut(&QualifiedTable::new(schema, dst_table))?;
                let mut retained = Vec::with_capacity(dst_rows.len());
                for row in dst_rows.drain(..) {
                    match row_key(&row, primary_key, case_sensitive)? {
                        Some(key) if src_keys.contains(&key) => {}
                        _ => retained.push(row),
                    }
                }
                *dst_rows = retained;
            }
            MemoryStatement::CaseSensitiveIdentifiers(enabled) => {
                self.case_sensitive_identifiers = *enabled;
            }
        }

        Ok(())
    }
}

/// Returns the table a statement writes to, if any.
fn statement_target(statement: &MemoryStatement) -> Option<QualifiedTable> {
    match statement {
        MemoryStatement::Truncate { schema, table } => Some(QualifiedTable::new(schema, table)),
        MemoryStatement::Copy {
            schema, dst_table, ..
        }
        | MemoryStatement::DedupCopy {
            schema, dst_table, ..
        }
        | MemoryStatement::DeleteByKey {
            schema, dst_table, ..
        } => Some(QualifiedTable::new(schema, dst_table)),
        MemoryStatement::CaseSensitiveIdentifiers(_) => None,
    }
}

/// Resolves one key path inside a JSON row.
///
/// Without case-sensitive identifiers a segment falls back to a case-insensitive match.
fn resolve_key_path<'a>(row: &'a Value, path: &KeyPath, case_sensitive: bool) -> Option<&'a Value> {
    let mut current = row;
    for segment in path.segments() {
        let object = current.as_object()?;
        current = match object.get(segment) {
            Some(value) => value,
            None if !case_sensitive => object
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(segment))
                .map(|(_, value)| value)?,
            None => return None,
        };
    }

    Some(current)
}

/// Computes the comparable key of a row, or `None` when a key field is missing or null.
///
/// Null key fields never compare equal, like in SQL.
fn row_key(row: &Value, primary_key: &PrimaryKey, case_sensitive: bool) -> EtlResult<Option<String>> {
    let mut values = Vec::with_capacity(primary_key.paths().len());
    for path in primary_key.paths() {
        match resolve_key_path(row, path, case_sensitive) {
            Some(Value::Null) | None => return Ok(None),
            Some(value) => values.push(value),
        }
    }

    Ok(Some(serde_json::to_string(&values)?))
}

#[derive(Debug, Default)]
struct Inner {
    /// Staged objects per stage, keyed by full object path.
    stages: HashMap<String, BTreeMap<String, Vec<Value>>>,
    committed: TableSet,
    write_denied: HashSet<QualifiedTable>,
    transactions: Vec<Vec<MemoryStatement>>,
}

/// In-memory [`StagingOperations`] for development and testing.
///
/// Stages hold JSON records per object path and tables hold ordered JSON rows. Transactions
/// are applied to a copy of the table set which is swapped in only if every statement succeeds.
///
/// Both optional capabilities are supported by default and can be switched off with
/// [`MemoryStagingOperations::without_dedup_copy`] and
/// [`MemoryStagingOperations::without_case_sensitive_identifiers`] to exercise fallbacks.
#[derive(Debug, Clone)]
pub struct MemoryStagingOperations {
    inner: Arc<Mutex<Inner>>,
    dedup_copy: bool,
    case_sensitive_identifiers: bool,
}

impl MemoryStagingOperations {
    /// Creates an empty destination with all optional capabilities.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            dedup_copy: true,
            case_sensitive_identifiers: true,
        }
    }

    /// Disables [`StagingOperations::dedup_copy_table_query`].
    pub fn without_dedup_copy(mut self) -> Self {
        self.dedup_copy = false;
        self
    }

    /// Disables [`StagingOperations::case_sensitive_identifiers_query`].
    pub fn without_case_sensitive_identifiers(mut self) -> Self {
        self.case_sensitive_identifiers = false;
        self
    }

    /// Uploads a file of records to the stage, creating the stage if needed.
    ///
    /// Returns the identifier to record in the stream's write config.
    pub async fn upload_staged_file(
        &self,
        stage_name: &str,
        staging_path: &str,
        file_name: &str,
        records: Vec<Value>,
    ) -> String {
        let mut inner = self.inner.lock().await;

        let object_path = format!("{staging_path}{file_name}");
        debug!(stage = stage_name, object = %object_path, records = records.len(), "uploading staged file");

        inner
            .stages
            .entry(stage_name.to_string())
            .or_default()
            .insert(object_path, records);

        file_name.to_string()
    }

    /// Creates a table holding the given rows, replacing any existing one.
    pub async fn insert_table(&self, schema_name: &str, table_name: &str, rows: Vec<Value>) {
        let mut inner = self.inner.lock().await;
        inner
            .committed
            .tables
            .insert(QualifiedTable::new(schema_name, table_name), rows);
    }

    /// Makes every statement writing to the table fail with [`ErrorKind::PermissionDenied`].
    pub async fn deny_writes(&self, schema_name: &str, table_name: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .write_denied
            .insert(QualifiedTable::new(schema_name, table_name));
    }

    /// Returns a copy of the rows of a table, or `None` if it does not exist.
    pub async fn table_rows(&self, schema_name: &str, table_name: &str) -> Option<Vec<Value>> {
        let inner = self.inner.lock().await;
        inner
            .committed
            .tables
            .get(&QualifiedTable::new(schema_name, table_name))
            .cloned()
    }

    pub async fn has_table(&self, schema_name: &str, table_name: &str) -> bool {
        self.table_rows(schema_name, table_name).await.is_some()
    }

    /// Returns the object paths held by a stage, or `None` if it does not exist.
    pub async fn stage_objects(&self, stage_name: &str) -> Option<Vec<String>> {
        let inner = self.inner.lock().await;
        inner
            .stages
            .get(stage_name)
            .map(|objects| objects.keys().cloned().collect())
    }

    pub async fn has_stage(&self, stage_name: &str) -> bool {
        self.stage_objects(stage_name).await.is_some()
    }

    /// Returns the statements of every committed transaction, in commit order.
    pub async fn committed_transactions(&self) -> Vec<Vec<MemoryStatement>> {
        let inner = self.inner.lock().await;
        inner.transactions.clone()
    }

    /// Returns whether identifiers are currently resolved case-sensitively.
    pub async fn case_sensitive_identifiers_enabled(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.committed.case_sensitive_identifiers
    }
}

impl Default for MemoryStagingOperations {
    fn default() -> Self {
        Self::new()
    }
}

impl StagingOperations for MemoryStagingOperations {
    type Statement = MemoryStatement;

    fn name() -> &'static str {
        "memory"
    }

    fn stage_name(&self, schema_name: &str, stream_name: &str) -> String {
        format!("{schema_name}_{stream_name}")
    }

    fn staging_path(
        &self,
        connection_id: ConnectionId,
        schema_name: &str,
        stream_name: &str,
        write_datetime: DateTime<Utc>,
    ) -> String {
        dated_staging_path(
            &self.stage_name(schema_name, stream_name),
            connection_id,
            write_datetime,
        )
    }

    async fn copy_into_tmp_table_from_stage(
        &self,
        stage_name: &str,
        staging_path: &str,
        staged_files: &[String],
        tmp_table_name: &str,
        schema_name: &str,
    ) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;

        let mut records = Vec::new();
        for file in staged_files {
            let object_path = format!("{staging_path}{file}");
            let Some(object) = inner
                .stages
                .get(stage_name)
                .and_then(|objects| objects.get(&object_path))
            else {
                bail!(
                    ErrorKind::StagedFileMissing,
                    "Staged file not found",
                    format!("object `{object_path}` is not in stage `{stage_name}`")
                );
            };

            records.extend(object.iter().cloned());
        }

        info!(
            stage = stage_name,
            staging_path,
            tmp_table = tmp_table_name,
            file_count = staged_files.len(),
            record_count = records.len(),
            "copying staged files into temporary table"
        );

        inner
            .committed
            .tables
            .entry(QualifiedTable::new(schema_name, tmp_table_name))
            .or_default()
            .extend(records);

        Ok(())
    }

    async fn create_table_if_not_exists(&self, schema_name: &str, table_name: &str) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .committed
            .tables
            .entry(QualifiedTable::new(schema_name, table_name))
            .or_default();

        Ok(())
    }

    async fn drop_table_if_exists(&self, schema_name: &str, table_name: &str) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .committed
            .tables
            .remove(&QualifiedTable::new(schema_name, table_name));

        Ok(())
    }

    async fn drop_stage_if_exists(&self, stage_name: &str) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        inner.stages.remove(stage_name);

        Ok(())
    }

    async fn clean_up_stage(
        &self,
        stage_name: &str,
        staging_path: &str,
        staged_files: &[String],
    ) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;

        if let Some(objects) = inner.stages.get_mut(stage_name) {
            for file in staged_files {
                objects.remove(&format!("{staging_path}{file}"));
            }
        }

        Ok(())
    }

    fn truncate_table_query(&self, schema_name: &str, table_name: &str) -> MemoryStatement {
        MemoryStatement::Truncate {
            schema: schema_name.to_string(),
            table: table_name.to_string(),
        }
    }

    fn copy_table_query(
        &self,
        schema_name: &str,
        src_table_name: &str,
        dst_table_name: &str,
    ) -> MemoryStatement {
        MemoryStatement::Copy {
            schema: schema_name.to_string(),
            src_table: src_table_name.to_string(),
            dst_table: dst_table_name.to_string(),
        }
    }

    fn dedup_copy_table_query(
        &self,
        schema_name: &str,
        src_table_name: &str,
        dst_table_name: &str,
        primary_key: &PrimaryKey,
    ) -> Option<MemoryStatement> {
        self.dedup_copy.then(|| MemoryStatement::DedupCopy {
            schema: schema_name.to_string(),
            src_table: src_table_name.to_string(),
            dst_table: dst_table_name.to_string(),
            primary_key: primary_key.clone(),
        })
    }

    fn delete_from_table_query(
        &self,
        schema_name: &str,
        src_table_name: &str,
        dst_table_name: &str,
        primary_key: &PrimaryKey,
    ) -> MemoryStatement {
        MemoryStatement::DeleteByKey {
            schema: schema_name.to_string(),
            src_table: src_table_name.to_string(),
            dst_table: dst_table_name.to_string(),
            primary_key: primary_key.clone(),
        }
    }

    fn case_sensitive_identifiers_query(&self, enabled: bool) -> Option<MemoryStatement> {
        self.case_sensitive_identifiers
            .then_some(MemoryStatement::CaseSensitiveIdentifiers(enabled))
    }

    async fn execute_transaction(&self, statements: Vec<MemoryStatement>) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;

        info!("executing transaction with {} statements", statements.len());

        let mut working = inner.committed.clone();
        for (index, statement) in statements.iter().enumerate() {
            if let Err(err) = working.apply(statement, &inner.write_denied) {
                return Err(etl_error!(
                    ErrorKind::DestinationTransactionFailed,
                    "Transaction rolled back",
                    format!("statement {index} `{statement}` failed"),
                    source: err
                ));
            }
        }

        inner.committed = working;
        inner.transactions.push(statements);

        Ok(())
    }
}
