use chrono::{DateTime, Utc};
use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{PrimaryKey, StreamId, SyncMode};

/// Ordered identifiers of files uploaded to the stage for one stream.
///
/// Identifiers are opaque to the finalizer; the staging implementation that produced them
/// knows how to resolve them inside its stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedFiles(Vec<String>);

impl StagedFiles {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, file: String) {
        self.0.push(file);
    }

    fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.0)
    }
}

impl fmt::Display for StagedFiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(","))
    }
}

/// Per-stream description of what to load and how to finalize it.
///
/// One [`WriteConfig`] exists per destination stream per sync. Everything except the staged file
/// list is fixed at construction. The staged file list grows while files are uploaded and is
/// drained exactly once, right after its files were copied into the temporary table.
#[derive(Debug, Clone)]
pub struct WriteConfig {
    stream_id: StreamId,
    output_schema_name: String,
    tmp_table_name: String,
    output_table_name: String,
    sync_mode: SyncMode,
    write_datetime: DateTime<Utc>,
    primary_key: PrimaryKey,
    staged_files: StagedFiles,
}

impl WriteConfig {
    /// Creates a write config whose write datetime is the current UTC time.
    pub fn new(
        stream_id: StreamId,
        output_schema_name: impl Into<String>,
        tmp_table_name: impl Into<String>,
        output_table_name: impl Into<String>,
        sync_mode: SyncMode,
        primary_key: PrimaryKey,
    ) -> Self {
        Self {
            stream_id,
            output_schema_name: output_schema_name.into(),
            tmp_table_name: tmp_table_name.into(),
            output_table_name: output_table_name.into(),
            sync_mode,
            write_datetime: Utc::now(),
            primary_key,
            staged_files: StagedFiles::default(),
        }
    }

    /// Fixes the write datetime, which scopes the staging path of this sync.
    pub fn with_write_datetime(mut self, write_datetime: DateTime<Utc>) -> Self {
        self.write_datetime = write_datetime;
        self
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_id.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.stream_id.namespace.as_deref()
    }

    pub fn output_schema_name(&self) -> &str {
        &self.output_schema_name
    }

    pub fn tmp_table_name(&self) -> &str {
        &self.tmp_table_name
    }

    pub fn output_table_name(&self) -> &str {
        &self.output_table_name
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    pub fn write_datetime(&self) -> DateTime<Utc> {
        self.write_datetime
    }

    pub fn primary_key(&self) -> &PrimaryKey {
        &self.primary_key
    }

    pub fn staged_files(&self) -> &StagedFiles {
        &self.staged_files
    }

    /// Records a file uploaded to the stage for this stream.
    pub fn add_staged_file(&mut self, file: impl Into<String>) {
        self.staged_files.push(file.into());
    }

    /// Empties the staged file list and returns the identifiers it held.
    ///
    /// Called once the files were copied into the temporary table, so that a retried
    /// finalization never copies them again.
    pub fn drain_staged_files(&mut self) -> Vec<String> {
        self.staged_files.take()
    }

    /// Returns `true` if no staged file is waiting to be copied.
    pub fn is_drained(&self) -> bool {
        self.staged_files.is_empty()
    }

    /// Validates the naming and key invariants of this config.
    pub fn validate(&self) -> EtlResult<()> {
        if self.stream_id.name.trim().is_empty() {
            bail!(
                ErrorKind::ValidationError,
                "Stream name must not be empty"
            );
        }

        for (field, value) in [
            ("output_schema_name", &self.output_schema_name),
            ("tmp_table_name", &self.tmp_table_name),
            ("output_table_name", &self.output_table_name),
        ] {
            if value.trim().is_empty() {
                bail!(
                    ErrorKind::ValidationError,
                    "Destination name must not be empty",
                    format!("`{field}` of stream {} is empty", self.stream_id)
                );
            }
        }

        if self.tmp_table_name == self.output_table_name {
            bail!(
                ErrorKind::ValidationError,
                "Temporary and final table names must differ",
                format!(
                    "stream {} uses `{}` for both tables",
                    self.stream_id, self.tmp_table_name
                )
            );
        }

        if self.sync_mode.requires_primary_key() {
            if self.primary_key.is_empty() {
                bail!(
                    ErrorKind::ConfigError,
                    "Deduplicated sync requires a primary key",
                    format!(
                        "stream {} uses sync mode {} without a primary key",
                        self.stream_id, self.sync_mode
                    )
                );
            }

            if self.primary_key.paths().iter().any(|path| path.is_empty()) {
                bail!(
                    ErrorKind::ConfigError,
                    "Primary key paths must not be empty",
                    format!("stream {} has an empty key path", self.stream_id)
                );
            }
        }

        Ok(())
    }
}

impl fmt::Display for WriteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WriteConfig {{ stream: {}, schema: {}, tmp_table: {}, final_table: {}, sync_mode: {}, primary_key: {} }}",
            self.stream_id,
            self.output_schema_name,
            self.tmp_table_name,
            self.output_table_name,
            self.sync_mode,
            self.primary_key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KeyPath;
    use chrono::TimeZone;

    fn users_config(sync_mode: SyncMode, primary_key: PrimaryKey) -> WriteConfig {
        WriteConfig::new(
            StreamId::new(Some("public".to_string()), "users"),
            "analytics",
            "_tmp_users",
            "users",
            sync_mode,
            primary_key,
        )
    }

    #[test]
    fn staged_files_are_drained_once() {
        let mut config = users_config(SyncMode::Append, PrimaryKey::default());
        config.add_staged_file("a.csv.gz");
        config.add_staged_file("b.csv.gz");

        assert_eq!(config.staged_files().len(), 2);
        assert!(!config.is_drained());

        let drained = config.drain_staged_files();
        assert_eq!(drained, vec!["a.csv.gz", "b.csv.gz"]);
        assert!(config.is_drained());
        assert!(config.drain_staged_files().is_empty());
    }

    #[test]
    fn write_datetime_can_be_fixed() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let config = users_config(SyncMode::Append, PrimaryKey::default()).with_write_datetime(at);

        assert_eq!(config.write_datetime(), at);
    }

    #[test]
    fn validate_accepts_dedup_with_key() {
        let config = users_config(SyncMode::AppendDedup, PrimaryKey::from_columns(["id"]));

        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_dedup_without_key() {
        let config = users_config(SyncMode::AppendDedup, PrimaryKey::default());

        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn validate_rejects_empty_key_path() {
        let config = users_config(
            SyncMode::AppendDedup,
            PrimaryKey::new(vec![KeyPath::new(Vec::<String>::new())]),
        );

        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn validate_rejects_identical_table_names() {
        let config = WriteConfig::new(
            StreamId::new(None, "users"),
            "analytics",
            "users",
            "users",
            SyncMode::Overwrite,
            PrimaryKey::default(),
        );

        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn validate_rejects_blank_schema() {
        let config = WriteConfig::new(
            StreamId::new(None, "users"),
            " ",
            "_tmp_users",
            "users",
            SyncMode::Append,
            PrimaryKey::default(),
        );

        let err = config.validate().unwrap_err();
        assert!(err.detail().unwrap().contains("output_schema_name"));
    }

    #[test]
    fn append_ignores_missing_key() {
        let config = users_config(SyncMode::Append, PrimaryKey::default());

        assert!(config.validate().is_ok());
    }
}
