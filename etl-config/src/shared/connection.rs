use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions as SqlxConnectOptions, PgSslMode as SqlxSslMode};
use std::sync::LazyLock;

const APP_NAME_LOADER: &str = "etl_staged_loader";

/// Session settings for loader connections to Redshift.
///
/// Finalization runs long `COPY` and `INSERT ... SELECT` statements, so statements are not
/// limited by default.
pub static ETL_LOADER_OPTIONS: LazyLock<RedshiftConnectionOptions> =
    LazyLock::new(|| RedshiftConnectionOptions {
        statement_timeout: 0,
        timezone: "UTC".to_string(),
        datestyle: "ISO".to_string(),
        application_name: APP_NAME_LOADER.to_string(),
    });

#[derive(Debug, Clone)]
pub struct RedshiftConnectionOptions {
    pub statement_timeout: u32,
    pub timezone: String,
    pub datestyle: String,
    pub application_name: String,
}

impl RedshiftConnectionOptions {
    pub fn to_key_value_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("statement_timeout".to_string(), self.statement_timeout.to_string()),
            ("timezone".to_string(), self.timezone.clone()),
            ("datestyle".to_string(), self.datestyle.clone()),
        ]
    }
}

const fn default_redshift_port() -> u16 {
    RedshiftConnectionConfig::DEFAULT_PORT
}

const fn default_require_ssl() -> bool {
    true
}

const fn default_max_connections() -> u32 {
    RedshiftConnectionConfig::DEFAULT_MAX_CONNECTIONS
}

/// Connection settings of a Redshift cluster.
///
/// This intentionally does not implement [`Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct RedshiftConnectionConfig {
    pub host: String,
    #[serde(default = "default_redshift_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: Option<SecretString>,
    /// Requires TLS on the connection. Redshift clusters accept TLS by default.
    #[serde(default = "default_require_ssl")]
    pub require_ssl: bool,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl RedshiftConnectionConfig {
    pub const DEFAULT_PORT: u16 = 5439;

    pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;

    /// Builds `sqlx` connect options, attaching session settings when given.
    pub fn connect_options(&self, options: Option<&RedshiftConnectionOptions>) -> SqlxConnectOptions {
        let ssl_mode = if self.require_ssl {
            SqlxSslMode::Require
        } else {
            SqlxSslMode::Prefer
        };

        let mut connect_options = SqlxConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .database(&self.database)
            .ssl_mode(ssl_mode);

        if let Some(password) = &self.password {
            connect_options = connect_options.password(password.expose_secret());
        }

        if let Some(opts) = options {
            connect_options = connect_options
                .application_name(&opts.application_name)
                .options(opts.to_key_value_pairs());
        }

        connect_options
    }
}

/// Same as [`RedshiftConnectionConfig`] but without secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedshiftConnectionConfigWithoutSecrets {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub require_ssl: bool,
    pub max_connections: u32,
}

impl From<RedshiftConnectionConfig> for RedshiftConnectionConfigWithoutSecrets {
    fn from(value: RedshiftConnectionConfig) -> Self {
        RedshiftConnectionConfigWithoutSecrets {
            host: value.host,
            port: value.port,
            database: value.database,
            username: value.username,
            require_ssl: value.require_ssl,
            max_connections: value.max_connections,
        }
    }
}

/// S3 bucket holding the stages of a Redshift destination.
///
/// This intentionally does not implement [`Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct S3StagingConfig {
    pub bucket_name: String,
    /// Prefix inside the bucket under which every stage lives.
    pub bucket_path: String,
    pub region: String,
    pub access_key_id: SecretString,
    pub secret_access_key: SecretString,
    /// Custom endpoint for S3 compatible stores.
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Same as [`S3StagingConfig`] but without secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3StagingConfigWithoutSecrets {
    pub bucket_name: String,
    pub bucket_path: String,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl From<S3StagingConfig> for S3StagingConfigWithoutSecrets {
    fn from(value: S3StagingConfig) -> Self {
        S3StagingConfigWithoutSecrets {
            bucket_name: value.bucket_name,
            bucket_path: value.bucket_path,
            region: value.region,
            endpoint: value.endpoint,
        }
    }
}
