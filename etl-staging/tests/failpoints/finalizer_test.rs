use etl_staging::error::ErrorKind;
use etl_staging::failpoints::{CLEANUP__BEFORE_DROP_TMP_TABLE, FINALIZE__BEFORE_TRANSACTION};
use etl_staging::finalizer::{CleanupArtifact, FinalizerConfig, StagingFinalizer};
use etl_staging::staging::memory::MemoryStagingOperations;
use etl_staging::test_utils::failpoints::FailpointScenario;
use etl_staging::test_utils::fixtures::{
    TEST_SCHEMA, record, stage_records, tmp_table_name, write_config,
};
use etl_staging::types::{ConnectionId, PrimaryKey, SyncMode, WriteConfig};
use etl_telemetry::tracing::init_test_tracing;

async fn append_stream(
    memory: &MemoryStagingOperations,
    connection_id: ConnectionId,
    name: &str,
) -> WriteConfig {
    let mut config = write_config(name, SyncMode::Append, PrimaryKey::default());
    stage_records(
        memory,
        connection_id,
        &mut config,
        "0.jsonl",
        vec![record(1, name)],
    )
    .await;

    config
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_before_transaction_still_cleans_up() {
    init_test_tracing();
    let _scenario = FailpointScenario::setup(&[(FINALIZE__BEFORE_TRANSACTION, "return")]);

    let memory = MemoryStagingOperations::new();
    let connection_id = ConnectionId::random();
    memory
        .insert_table(TEST_SCHEMA, "users", vec![record(5, "existing")])
        .await;

    let users = append_stream(&memory, connection_id, "users").await;
    let events = append_stream(&memory, connection_id, "events").await;

    let mut finalizer = StagingFinalizer::new(
        memory.clone(),
        connection_id,
        vec![users, events],
        FinalizerConfig::default(),
    )
    .unwrap();
    let err = finalizer.close(false).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::FailpointTriggered);
    assert!(memory.committed_transactions().await.is_empty());
    assert_eq!(
        memory.table_rows(TEST_SCHEMA, "users").await.unwrap(),
        vec![record(5, "existing")]
    );
    assert!(!memory.has_table(TEST_SCHEMA, &tmp_table_name("users")).await);
    assert!(!memory.has_table(TEST_SCHEMA, &tmp_table_name("events")).await);
    assert!(!memory.has_stage("public_users").await);
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_tmp_table_drop_does_not_stop_cleanup() {
    init_test_tracing();
    let _scenario = FailpointScenario::setup(&[(CLEANUP__BEFORE_DROP_TMP_TABLE, "1*return")]);

    let memory = MemoryStagingOperations::new();
    let connection_id = ConnectionId::random();

    let users = append_stream(&memory, connection_id, "users").await;
    let events = append_stream(&memory, connection_id, "events").await;

    let mut finalizer = StagingFinalizer::new(
        memory.clone(),
        connection_id,
        vec![users, events],
        FinalizerConfig::default(),
    )
    .unwrap();
    let report = finalizer.close(false).await.unwrap();

    assert_eq!(report.failures().len(), 1);
    let failure = &report.failures()[0];
    assert_eq!(failure.stream_id.name, "users");
    assert_eq!(
        failure.artifact,
        CleanupArtifact::TmpTable {
            schema: TEST_SCHEMA.to_string(),
            table: tmp_table_name("users"),
        }
    );
    assert_eq!(failure.error.kind(), ErrorKind::FailpointTriggered);

    // The first drop was skipped, everything after it still ran.
    assert!(memory.has_table(TEST_SCHEMA, &tmp_table_name("users")).await);
    assert!(!memory.has_table(TEST_SCHEMA, &tmp_table_name("events")).await);
    assert!(!memory.has_stage("public_users").await);
    assert!(!memory.has_stage("public_events").await);
    assert_eq!(
        memory.table_rows(TEST_SCHEMA, "events").await.unwrap(),
        vec![record(1, "events")]
    );
}
