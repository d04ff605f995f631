use serde::{Deserialize, Serialize};

use crate::shared::{
    RedshiftConnectionConfig, RedshiftConnectionConfigWithoutSecrets, S3StagingConfig,
    S3StagingConfigWithoutSecrets,
};

/// Destination that staged files are finalized into.
///
/// This intentionally does not implement [`Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationConfig {
    /// In-process destination, used for local runs and tests.
    Memory,
    /// Amazon Redshift with stages in an S3 bucket.
    Redshift {
        connection: RedshiftConnectionConfig,
        s3: S3StagingConfig,
    },
}

impl DestinationConfig {
    pub fn name(&self) -> &'static str {
        match self {
            DestinationConfig::Memory => "memory",
            DestinationConfig::Redshift { .. } => "redshift",
        }
    }
}

/// Same as [`DestinationConfig`] but without secrets. This type
/// implements [`Serialize`] because it does not contains secrets
/// so is safe to serialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationConfigWithoutSecrets {
    Memory,
    Redshift {
        connection: RedshiftConnectionConfigWithoutSecrets,
        s3: S3StagingConfigWithoutSecrets,
    },
}

impl From<DestinationConfig> for DestinationConfigWithoutSecrets {
    fn from(value: DestinationConfig) -> Self {
        match value {
            DestinationConfig::Memory => DestinationConfigWithoutSecrets::Memory,
            DestinationConfig::Redshift { connection, s3 } => {
                DestinationConfigWithoutSecrets::Redshift {
                    connection: connection.into(),
                    s3: s3.into(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_memory_destination() {
        let config: DestinationConfig = serde_json::from_str(r#""memory""#).unwrap();

        assert!(matches!(config, DestinationConfig::Memory));
        assert_eq!(config.name(), "memory");
    }

    #[test]
    fn deserializes_redshift_destination() {
        let config: DestinationConfig = serde_json::from_str(
            r#"{
                "redshift": {
                    "connection": {
                        "host": "cluster.example.com",
                        "database": "analytics",
                        "username": "loader",
                        "password": "hunter2"
                    },
                    "s3": {
                        "bucket_name": "staging",
                        "bucket_path": "etl",
                        "region": "eu-west-1",
                        "access_key_id": "AKIA",
                        "secret_access_key": "very-secret"
                    }
                }
            }"#,
        )
        .unwrap();

        let without_secrets = DestinationConfigWithoutSecrets::from(config);
        let serialized = serde_json::to_string(&without_secrets).unwrap();

        assert!(serialized.contains("cluster.example.com"));
        assert!(!serialized.contains("hunter2"));
        assert!(!serialized.contains("very-secret"));
    }
}
