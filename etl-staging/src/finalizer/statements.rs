use tracing::debug;

use crate::staging::StagingOperations;
use crate::types::{SyncMode, WriteConfig};

/// Builds the ordered statements that merge one stream's temporary table into its final table.
///
/// - [`SyncMode::Overwrite`]: truncate the final table, then copy.
/// - [`SyncMode::Append`]: copy.
/// - [`SyncMode::AppendDedup`]: delete superseded rows by primary key, then copy at most one row
///   per key. When the destination has a case-sensitivity switch, the delete and copy pair is
///   bracketed by switching it on and off. Destinations without a dedup-aware copy get the plain
///   copy.
pub fn stream_statements<O>(ops: &O, write_config: &WriteConfig) -> Vec<O::Statement>
where
    O: StagingOperations,
{
    let schema_name = write_config.output_schema_name();
    let tmp_table_name = write_config.tmp_table_name();
    let output_table_name = write_config.output_table_name();

    let statements = match write_config.sync_mode() {
        SyncMode::Overwrite => vec![
            ops.truncate_table_query(schema_name, output_table_name),
            ops.copy_table_query(schema_name, tmp_table_name, output_table_name),
        ],
        SyncMode::Append => vec![ops.copy_table_query(
            schema_name,
            tmp_table_name,
            output_table_name,
        )],
        SyncMode::AppendDedup => {
            let primary_key = write_config.primary_key();

            let delete = ops.delete_from_table_query(
                schema_name,
                tmp_table_name,
                output_table_name,
                primary_key,
            );
            let copy = ops
                .dedup_copy_table_query(schema_name, tmp_table_name, output_table_name, primary_key)
                .unwrap_or_else(|| {
                    debug!(
                        stream = %write_config.stream_id(),
                        "dedup-aware copy not supported by {}, using plain copy",
                        O::name()
                    );
                    ops.copy_table_query(schema_name, tmp_table_name, output_table_name)
                });

            match (
                ops.case_sensitive_identifiers_query(true),
                ops.case_sensitive_identifiers_query(false),
            ) {
                (Some(on), Some(off)) => vec![on, delete, copy, off],
                _ => vec![delete, copy],
            }
        }
    };

    debug!(
        stream = %write_config.stream_id(),
        sync_mode = %write_config.sync_mode(),
        statement_count = statements.len(),
        "built stream statements"
    );

    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::memory::{MemoryStagingOperations, MemoryStatement};
    use crate::types::{PrimaryKey, StreamId};

    fn write_config(sync_mode: SyncMode) -> WriteConfig {
        WriteConfig::new(
            StreamId::new(None, "users"),
            "public",
            "_tmp_users",
            "users",
            sync_mode,
            PrimaryKey::from_columns(["id"]),
        )
    }

    fn copy() -> MemoryStatement {
        MemoryStatement::Copy {
            schema: "public".to_string(),
            src_table: "_tmp_users".to_string(),
            dst_table: "users".to_string(),
        }
    }

    #[test]
    fn overwrite_truncates_then_copies() {
        let ops = MemoryStagingOperations::new();

        assert_eq!(
            stream_statements(&ops, &write_config(SyncMode::Overwrite)),
            vec![
                MemoryStatement::Truncate {
                    schema: "public".to_string(),
                    table: "users".to_string(),
                },
                copy(),
            ]
        );
    }

    #[test]
    fn append_only_copies() {
        let ops = MemoryStagingOperations::new();

        assert_eq!(
            stream_statements(&ops, &write_config(SyncMode::Append)),
            vec![copy()]
        );
    }

    #[test]
    fn append_dedup_brackets_delete_and_copy() {
        let ops = MemoryStagingOperations::new();
        let primary_key = PrimaryKey::from_columns(["id"]);

        assert_eq!(
            stream_statements(&ops, &write_config(SyncMode::AppendDedup)),
            vec![
                MemoryStatement::CaseSensitiveIdentifiers(true),
                MemoryStatement::DeleteByKey {
                    schema: "public".to_string(),
                    src_table: "_tmp_users".to_string(),
                    dst_table: "users".to_string(),
                    primary_key: primary_key.clone(),
                },
                MemoryStatement::DedupCopy {
                    schema: "public".to_string(),
                    src_table: "_tmp_users".to_string(),
                    dst_table: "users".to_string(),
                    primary_key,
                },
                MemoryStatement::CaseSensitiveIdentifiers(false),
            ]
        );
    }

    #[test]
    fn append_dedup_falls_back_without_capabilities() {
        let ops = MemoryStagingOperations::new()
            .without_dedup_copy()
            .without_case_sensitive_identifiers();

        let statements = stream_statements(&ops, &write_config(SyncMode::AppendDedup));

        assert_eq!(statements.len(), 2);
        assert!(matches!(statements[0], MemoryStatement::DeleteByKey { .. }));
        assert_eq!(statements[1], copy());
    }
}
