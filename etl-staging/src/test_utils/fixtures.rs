use serde_json::{Value, json};

use crate::staging::StagingOperations;
use crate::staging::memory::MemoryStagingOperations;
use crate::types::{ConnectionId, PrimaryKey, StreamId, SyncMode, WriteConfig};

/// Schema every fixture stream writes to.
pub const TEST_SCHEMA: &str = "public";

/// Returns the temporary table name used by fixture streams.
pub fn tmp_table_name(stream_name: &str) -> String {
    format!("_etl_tmp_{stream_name}")
}

/// Builds a write config for a stream in [`TEST_SCHEMA`] whose final table is named after it.
pub fn write_config(stream_name: &str, sync_mode: SyncMode, primary_key: PrimaryKey) -> WriteConfig {
    WriteConfig::new(
        StreamId::new(Some("source".to_string()), stream_name),
        TEST_SCHEMA,
        tmp_table_name(stream_name),
        stream_name,
        sync_mode,
        primary_key,
    )
}

/// Builds a record with an `id` and a `value` field.
pub fn record(id: i64, value: &str) -> Value {
    json!({ "id": id, "value": value })
}

/// Uploads records as one file to the stream's stage and registers it in the write config.
pub async fn stage_records(
    ops: &MemoryStagingOperations,
    connection_id: ConnectionId,
    write_config: &mut WriteConfig,
    file_name: &str,
    records: Vec<Value>,
) {
    let schema_name = write_config.output_schema_name().to_string();
    let stream_name = write_config.stream_name().to_string();

    let stage_name = ops.stage_name(&schema_name, &stream_name);
    let staging_path = ops.staging_path(
        connection_id,
        &schema_name,
        &stream_name,
        write_config.write_datetime(),
    );

    let file = ops
        .upload_staged_file(&stage_name, &staging_path, file_name, records)
        .await;
    write_config.add_staged_file(file);
}
