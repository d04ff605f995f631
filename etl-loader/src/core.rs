use chrono::{DateTime, Utc};
use etl_config::shared::{
    DestinationConfig, DestinationConfigWithoutSecrets, LoaderConfig, LoaderConfigWithoutSecrets,
    RedshiftConnectionConfigWithoutSecrets, S3StagingConfigWithoutSecrets, StagingConfig,
    StreamConfig,
};
use etl_destinations::redshift::RedshiftStagingOperations;
use etl_staging::error::EtlResult;
use etl_staging::finalizer::{FinalizerConfig, StagingFinalizer};
use etl_staging::staging::StagingOperations;
use etl_staging::staging::memory::MemoryStagingOperations;
use etl_staging::types::{ConnectionId, PrimaryKey, StreamId, SyncMode, WriteConfig};
use tracing::{debug, info, warn};

use crate::error::LoaderResult;

/// Finalizes every configured stream into the configured destination.
///
/// One [`ConnectionId`] is generated for the whole run and the finalizer is closed exactly once.
pub async fn start_loader_with_config(loader_config: LoaderConfig) -> LoaderResult<()> {
    info!("starting loader");

    log_config(&loader_config);

    let load_started_at = Utc::now();
    let write_configs = loader_config
        .streams
        .iter()
        .map(|stream| write_config_from_stream(stream, load_started_at))
        .collect::<EtlResult<Vec<_>>>()?;

    // Static dispatch per destination keeps the finalizer monomorphic.
    match &loader_config.destination {
        DestinationConfig::Memory => {
            let ops = MemoryStagingOperations::new();
            finalize(ops, write_configs, &loader_config.staging).await?;
        }
        DestinationConfig::Redshift { connection, s3 } => {
            let ops = RedshiftStagingOperations::connect(connection, s3).await?;
            finalize(ops, write_configs, &loader_config.staging).await?;
        }
    }

    info!("loader completed");

    Ok(())
}

/// Runs finalization once and logs what cleanup could not remove.
async fn finalize<O>(
    ops: O,
    write_configs: Vec<WriteConfig>,
    staging_config: &StagingConfig,
) -> LoaderResult<()>
where
    O: StagingOperations + Send + Sync + 'static,
{
    let connection_id = ConnectionId::random();
    info!(%connection_id, destination = O::name(), "finalizing staged data");

    let mut finalizer = StagingFinalizer::new(
        ops,
        connection_id,
        write_configs,
        FinalizerConfig::from(staging_config),
    )?;

    let report = finalizer.close(false).await?;

    if report.is_clean() {
        info!("cleanup completed without failures");
    } else {
        for failure in report.failures() {
            warn!(
                stream = %failure.stream_id,
                artifact = %failure.artifact,
                error = %failure.error,
                "left staging artifact behind"
            );
        }
    }

    Ok(())
}

/// Builds the write config of a configured stream.
///
/// Streams without an explicit write datetime use `default_write_datetime`.
pub fn write_config_from_stream(
    stream: &StreamConfig,
    default_write_datetime: DateTime<Utc>,
) -> EtlResult<WriteConfig> {
    let sync_mode: SyncMode = stream.sync_mode.parse()?;

    let write_datetime = match &stream.write_datetime {
        Some(value) => DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc),
        None => default_write_datetime,
    };

    let mut write_config = WriteConfig::new(
        StreamId::new(stream.namespace.clone(), stream.name.clone()),
        stream.output_schema.clone(),
        stream.tmp_table.clone(),
        stream.final_table.clone(),
        sync_mode,
        PrimaryKey::from(stream.primary_key.clone()),
    )
    .with_write_datetime(write_datetime);

    for file in &stream.staged_files {
        write_config.add_staged_file(file.clone());
    }

    write_config.validate()?;

    Ok(write_config)
}

/// Logs the configuration with every secret stripped.
fn log_config(config: &LoaderConfig) {
    let config = LoaderConfigWithoutSecrets::from(config.clone());

    log_destination_config(&config.destination);
    log_staging_config(&config.staging);

    for stream in &config.streams {
        debug!(
            stream = %stream,
            output_schema = stream.output_schema,
            tmp_table = stream.tmp_table,
            final_table = stream.final_table,
            sync_mode = stream.sync_mode,
            file_count = stream.staged_files.len(),
            "stream config"
        );
    }
}

fn log_destination_config(config: &DestinationConfigWithoutSecrets) {
    match config {
        DestinationConfigWithoutSecrets::Memory => {
            debug!("using memory destination config");
        }
        DestinationConfigWithoutSecrets::Redshift { connection, s3 } => {
            log_redshift_connection_config(connection);
            log_s3_staging_config(s3);
        }
    }
}

fn log_redshift_connection_config(config: &RedshiftConnectionConfigWithoutSecrets) {
    debug!(
        host = config.host,
        port = config.port,
        database = config.database,
        username = config.username,
        require_ssl = config.require_ssl,
        max_connections = config.max_connections,
        "redshift connection config"
    );
}

fn log_s3_staging_config(config: &S3StagingConfigWithoutSecrets) {
    debug!(
        bucket_name = config.bucket_name,
        bucket_path = config.bucket_path,
        region = config.region,
        endpoint = config.endpoint,
        "s3 staging config"
    );
}

fn log_staging_config(config: &StagingConfig) {
    debug!(
        purge_staging_data = config.purge_staging_data,
        max_concurrent_copies = config.max_concurrent_copies,
        copy_timeout_ms = config.copy_timeout_ms,
        "staging config"
    );
}
