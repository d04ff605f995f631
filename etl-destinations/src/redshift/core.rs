use chrono::{DateTime, Utc};
use etl_config::shared::{
    ETL_LOADER_OPTIONS, RedshiftConnectionConfig, S3StagingConfig,
};
use etl_staging::error::{ErrorKind, EtlResult};
use etl_staging::staging::{StagingOperations, dated_staging_path};
use etl_staging::types::{ConnectionId, PrimaryKey};
use etl_staging::{bail, etl_error};
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::redshift::error::{object_store_error_to_etl_error, sqlx_error_to_etl_error};
use crate::redshift::manifest::CopyManifest;
use crate::redshift::sql;

/// S3 location and credentials of the stages.
#[derive(Debug, Clone)]
struct S3Stage {
    bucket_name: String,
    bucket_path: String,
    region: String,
    access_key_id: SecretString,
    secret_access_key: SecretString,
}

impl From<&S3StagingConfig> for S3Stage {
    fn from(config: &S3StagingConfig) -> Self {
        Self {
            bucket_name: config.bucket_name.clone(),
            bucket_path: config.bucket_path.trim_matches('/').to_string(),
            region: config.region.clone(),
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
        }
    }
}

/// Finalizes staged files into Redshift.
///
/// Stages are prefixes of an S3 bucket reached through [`ObjectStore`]. Files are loaded with
/// `COPY ... MANIFEST` and every other statement runs over a [`PgPool`].
#[derive(Debug, Clone)]
pub struct RedshiftStagingOperations {
    pool: PgPool,
    store: Arc<dyn ObjectStore>,
    stage: S3Stage,
}

impl RedshiftStagingOperations {
    /// Connects to the cluster and builds the S3 client of the stages.
    pub async fn connect(
        connection: &RedshiftConnectionConfig,
        s3: &S3StagingConfig,
    ) -> EtlResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(connection.max_connections)
            .connect_with(connection.connect_options(Some(&ETL_LOADER_OPTIONS)))
            .await
            .map_err(sqlx_error_to_etl_error)?;

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&s3.bucket_name)
            .with_region(&s3.region)
            .with_access_key_id(s3.access_key_id.expose_secret())
            .with_secret_access_key(s3.secret_access_key.expose_secret());

        if let Some(endpoint) = &s3.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false);
        }

        let store = builder.build().map_err(object_store_error_to_etl_error)?;

        info!(
            host = %connection.host,
            database = %connection.database,
            bucket = %s3.bucket_name,
            "connected to redshift"
        );

        Ok(Self::new(pool, Arc::new(store), s3))
    }

    /// Builds the operations from an existing pool and object store.
    pub fn new(pool: PgPool, store: Arc<dyn ObjectStore>, s3: &S3StagingConfig) -> Self {
        Self {
            pool,
            store,
            stage: S3Stage::from(s3),
        }
    }

    async fn execute(&self, query: &str) -> EtlResult<()> {
        sqlx::query(query)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_etl_error)?;

        Ok(())
    }

    /// Lists every object key under `prefix`.
    async fn list_objects(&self, prefix: &str) -> EtlResult<Vec<Path>> {
        let prefix = Path::from(prefix);

        let objects = self
            .store
            .list(Some(&prefix))
            .map_ok(|meta| meta.location)
            .try_collect::<Vec<_>>()
            .await
            .map_err(object_store_error_to_etl_error)?;

        Ok(objects)
    }

    async fn delete_objects(&self, objects: Vec<Path>) -> EtlResult<usize> {
        let mut deleted = 0;
        for object in objects {
            match self.store.delete(&object).await {
                Ok(()) => deleted += 1,
                Err(object_store::Error::NotFound { .. }) => {}
                Err(err) => return Err(object_store_error_to_etl_error(err)),
            }
        }

        Ok(deleted)
    }

    /// Writes the manifest of `staged_files` next to them and returns its key.
    async fn write_manifest(&self, staging_path: &str, manifest: &CopyManifest) -> EtlResult<Path> {
        let manifest_path = Path::from(format!(
            "{}/{}.manifest",
            staging_path.trim_matches('/'),
            Uuid::new_v4()
        ));

        let body = serde_json::to_vec(manifest)?;
        self.store
            .put(&manifest_path, PutPayload::from(bytes::Bytes::from(body)))
            .await
            .map_err(object_store_error_to_etl_error)?;

        Ok(manifest_path)
    }
}

impl StagingOperations for RedshiftStagingOperations {
    type Statement = String;

    fn name() -> &'static str {
        "redshift"
    }

    fn stage_name(&self, schema_name: &str, stream_name: &str) -> String {
        if self.stage.bucket_path.is_empty() {
            format!("{schema_name}_{stream_name}")
        } else {
            format!("{}/{schema_name}_{stream_name}", self.stage.bucket_path)
        }
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
        self.execute(&sql::create_schema_if_not_exists(schema_name))
            .await?;
        self.create_table_if_not_exists(schema_name, tmp_table_name)
            .await?;

        if staged_files.is_empty() {
            debug!(stage = stage_name, tmp_table = tmp_table_name, "no staged files to copy");
            return Ok(());
        }

        if !staging_path.starts_with(stage_name) {
            bail!(
                ErrorKind::InvalidState,
                "Staging path is outside of its stage",
                format!("{staging_path} is not under {stage_name}")
            );
        }

        let manifest = CopyManifest::new(&self.stage.bucket_name, staging_path, staged_files);
        let manifest_path = self.write_manifest(staging_path, &manifest).await?;
        let manifest_url = format!("s3://{}/{manifest_path}", self.stage.bucket_name);

        debug!(
            tmp_table = tmp_table_name,
            manifest = %manifest_url,
            file_count = manifest.len(),
            "copying staged files into temporary table"
        );

        let copy_query = sql::copy_from_manifest(
            schema_name,
            tmp_table_name,
            &manifest_url,
            self.stage.access_key_id.expose_secret(),
            self.stage.secret_access_key.expose_secret(),
            &self.stage.region,
        );
        let copy_result = self.execute(&copy_query).await;

        // The manifest is only needed by the copy itself.
        if let Err(err) = self.store.delete(&manifest_path).await {
            warn!(manifest = %manifest_url, error = %err, "failed to delete copy manifest");
        }

        copy_result
    }

    async fn create_table_if_not_exists(&self, schema_name: &str, table_name: &str) -> EtlResult<()> {
        self.execute(&sql::create_table_if_not_exists(schema_name, table_name))
            .await
    }

    async fn drop_table_if_exists(&self, schema_name: &str, table_name: &str) -> EtlResult<()> {
        self.execute(&sql::drop_table_if_exists(schema_name, table_name))
            .await
    }

    async fn drop_stage_if_exists(&self, stage_name: &str) -> EtlResult<()> {
        let objects = self.list_objects(stage_name).await?;
        let deleted = self.delete_objects(objects).await?;

        info!(stage = stage_name, deleted, "dropped stage");

        Ok(())
    }

    async fn clean_up_stage(
        &self,
        stage_name: &str,
        staging_path: &str,
        staged_files: &[String],
    ) -> EtlResult<()> {
        if !staging_path.starts_with(stage_name) {
            bail!(
                ErrorKind::InvalidState,
                "Staging path is outside of its stage",
                format!("{staging_path} is not under {stage_name}")
            );
        }

        let staged_objects = staged_files
            .iter()
            .map(|file| Path::from(format!("{staging_path}{file}")))
            .collect::<Vec<_>>();
        let objects = self
            .list_objects(staging_path)
            .await?
            .into_iter()
            .filter(|object| staged_objects.contains(object))
            .collect::<Vec<_>>();

        let deleted = self.delete_objects(objects).await?;

        info!(
            stage = stage_name,
            staging_path,
            file_count = staged_files.len(),
            deleted,
            "cleaned up staged files"
        );

        Ok(())
    }

    fn truncate_table_query(&self, schema_name: &str, table_name: &str) -> Self::Statement {
        sql::truncate_table(schema_name, table_name)
    }

    fn copy_table_query(
        &self,
        schema_name: &str,
        src_table_name: &str,
        dst_table_name: &str,
    ) -> Self::Statement {
        sql::copy_table(schema_name, src_table_name, dst_table_name)
    }

    fn dedup_copy_table_query(
        &self,
        schema_name: &str,
        src_table_name: &str,
        dst_table_name: &str,
        primary_key: &PrimaryKey,
    ) -> Option<Self::Statement> {
        Some(sql::dedup_copy_table(
            schema_name,
            src_table_name,
            dst_table_name,
            primary_key,
        ))
    }

    fn delete_from_table_query(
        &self,
        schema_name: &str,
        src_table_name: &str,
        dst_table_name: &str,
        primary_key: &PrimaryKey,
    ) -> Self::Statement {
        sql::delete_from_table(schema_name, src_table_name, dst_table_name, primary_key)
    }

    fn case_sensitive_identifiers_query(&self, enabled: bool) -> Option<Self::Statement> {
        Some(sql::case_sensitive_identifiers(enabled))
    }

    async fn execute_transaction(&self, statements: Vec<Self::Statement>) -> EtlResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|err| {
            etl_error!(
                ErrorKind::DestinationTransactionFailed,
                "Failed to begin Redshift transaction",
                source: sqlx_error_to_etl_error(err)
            )
        })?;

        for statement in &statements {
            debug!(statement = %statement, "executing statement");

            if let Err(err) = sqlx::query(statement).execute(&mut *transaction).await {
                // Dropping the transaction rolls it back.
                return Err(etl_error!(
                    ErrorKind::DestinationTransactionFailed,
                    "Redshift transaction statement failed",
                    statement,
                    source: sqlx_error_to_etl_error(err)
                ));
            }
        }

        transaction.commit().await.map_err(|err| {
            etl_error!(
                ErrorKind::DestinationTransactionFailed,
                "Failed to commit Redshift transaction",
                source: sqlx_error_to_etl_error(err)
            )
        })?;

        info!(statement_count = statements.len(), "committed redshift transaction");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use etl_config::shared::RedshiftConnectionConfig;
    use object_store::memory::InMemory;

    use super::*;

    fn s3_config(bucket_path: &str) -> S3StagingConfig {
        S3StagingConfig {
            bucket_name: "staging".to_string(),
            bucket_path: bucket_path.to_string(),
            region: "us-east-1".to_string(),
            access_key_id: SecretString::new("AKIA".to_string()),
            secret_access_key: SecretString::new("secret".to_string()),
            endpoint: None,
        }
    }

    fn lazy_pool() -> PgPool {
        let connection = RedshiftConnectionConfig {
            host: "localhost".to_string(),
            port: RedshiftConnectionConfig::DEFAULT_PORT,
            database: "dev".to_string(),
            username: "loader".to_string(),
            password: None,
            require_ssl: false,
            max_connections: 1,
        };

        PgPoolOptions::new().connect_lazy_with(connection.connect_options(None))
    }

    async fn put(store: &InMemory, key: &str) {
        store
            .put(&Path::from(key), PutPayload::from(bytes::Bytes::from_static(b"data")))
            .await
            .unwrap();
    }

    async fn keys(store: &InMemory) -> Vec<String> {
        let mut keys = store
            .list(None)
            .map_ok(|meta| meta.location.to_string())
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn stage_and_staging_path_layout() {
        let ops = RedshiftStagingOperations::new(
            lazy_pool(),
            Arc::new(InMemory::new()),
            &s3_config("/etl/"),
        );
        let connection_id = ConnectionId::from(Uuid::nil());
        let at = Utc.with_ymd_and_hms(2024, 1, 9, 7, 45, 3).unwrap();

        assert_eq!(ops.stage_name("public", "users"), "etl/public_users");
        assert_eq!(
            ops.staging_path(connection_id, "public", "users", at),
            "etl/public_users/2024/01/09/07/00000000-0000-0000-0000-000000000000/"
        );

        let ops = RedshiftStagingOperations::new(lazy_pool(), Arc::new(InMemory::new()), &s3_config(""));
        assert_eq!(ops.stage_name("public", "users"), "public_users");
    }

    #[tokio::test]
    async fn clean_up_stage_removes_only_listed_files() {
        let store = Arc::new(InMemory::new());
        put(&store, "etl/public_users/2024/01/09/07/conn/part-0.csv.gz").await;
        put(&store, "etl/public_users/2024/01/09/07/conn/part-1.csv.gz").await;
        put(&store, "etl/public_orders/2024/01/09/07/conn/part-0.csv.gz").await;

        let ops = RedshiftStagingOperations::new(lazy_pool(), store.clone(), &s3_config("etl"));
        ops.clean_up_stage(
            "etl/public_users",
            "etl/public_users/2024/01/09/07/conn/",
            &["part-0.csv.gz".to_string()],
        )
        .await
        .unwrap();

        assert_eq!(
            keys(&store).await,
            vec![
                "etl/public_orders/2024/01/09/07/conn/part-0.csv.gz".to_string(),
                "etl/public_users/2024/01/09/07/conn/part-1.csv.gz".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn clean_up_stage_keeps_same_named_files_of_other_syncs() {
        let store = Arc::new(InMemory::new());
        let ops = RedshiftStagingOperations::new(lazy_pool(), store.clone(), &s3_config("etl"));
        let at = Utc.with_ymd_and_hms(2024, 1, 9, 7, 45, 3).unwrap();
        let ours = ops.staging_path(ConnectionId::random(), "public", "users", at);
        let theirs = ops.staging_path(ConnectionId::random(), "public", "users", at);
        put(&store, &format!("{ours}part-0.csv.gz")).await;
        put(&store, &format!("{theirs}part-0.csv.gz")).await;

        ops.clean_up_stage("etl/public_users", &ours, &["part-0.csv.gz".to_string()])
            .await
            .unwrap();

        assert_eq!(keys(&store).await, vec![format!("{theirs}part-0.csv.gz")]);
    }

    #[tokio::test]
    async fn clean_up_stage_rejects_staging_path_outside_of_stage() {
        let ops = RedshiftStagingOperations::new(lazy_pool(), Arc::new(InMemory::new()), &s3_config("etl"));

        let err = ops
            .clean_up_stage(
                "etl/public_users",
                "etl/public_orders/2024/01/09/07/conn/",
                &["part-0.csv.gz".to_string()],
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn drop_stage_removes_every_object_under_it() {
        let store = Arc::new(InMemory::new());
        put(&store, "etl/public_users/2024/01/09/07/conn/part-0.csv.gz").await;
        put(&store, "etl/public_users/2024/01/09/08/other/part-0.csv.gz").await;
        put(&store, "etl/public_orders/2024/01/09/07/conn/part-0.csv.gz").await;

        let ops = RedshiftStagingOperations::new(lazy_pool(), store.clone(), &s3_config("etl"));
        ops.drop_stage_if_exists("etl/public_users").await.unwrap();
        // Dropping a stage that no longer exists succeeds.
        ops.drop_stage_if_exists("etl/public_users").await.unwrap();

        assert_eq!(
            keys(&store).await,
            vec!["etl/public_orders/2024/01/09/07/conn/part-0.csv.gz".to_string()]
        );
    }

    #[tokio::test]
    async fn query_methods_emit_redshift_sql() {
        let ops = RedshiftStagingOperations::new(lazy_pool(), Arc::new(InMemory::new()), &s3_config("etl"));
        let primary_key = PrimaryKey::from_columns(["id"]);

        assert_eq!(ops.truncate_table_query("public", "users"), "DELETE FROM public.users");
        assert!(ops
            .dedup_copy_table_query("public", "_etl_tmp_users", "users", &primary_key)
            .is_some());
        assert_eq!(
            ops.case_sensitive_identifiers_query(false).as_deref(),
            Some("SET enable_case_sensitive_identifier TO false")
        );
        assert!(ops
            .delete_from_table_query("public", "_etl_tmp_users", "users", &primary_key)
            .starts_with("DELETE FROM public.users USING public._etl_tmp_users WHERE"));
    }
}
