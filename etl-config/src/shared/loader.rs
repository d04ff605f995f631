use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::Config;
use crate::shared::{
    DestinationConfig, DestinationConfigWithoutSecrets, StagingConfig, ValidationError,
};

/// Complete configuration of the staged loader binary.
///
/// Describes one sync: the destination, how finalization behaves and every stream whose
/// staged files are moved into its final table.
///
/// This intentionally does not implement [`Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    pub destination: DestinationConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    pub streams: Vec<StreamConfig>,
}

impl LoaderConfig {
    /// Validates staging settings and every stream, and rejects duplicate streams.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.staging.validate()?;

        if self.streams.is_empty() {
            return Err(ValidationError::NoStreams);
        }

        let mut seen = HashSet::with_capacity(self.streams.len());
        for stream in &self.streams {
            stream.validate()?;

            if !seen.insert((stream.namespace.as_deref(), stream.name.as_str())) {
                return Err(ValidationError::DuplicateStream(stream.to_string()));
            }
        }

        Ok(())
    }
}

impl Config for LoaderConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

/// A stream of the sync and the tables its staged files end up in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamConfig {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub output_schema: String,
    pub tmp_table: String,
    pub final_table: String,
    /// One of `overwrite`, `append` or `append_dedup`.
    pub sync_mode: String,
    /// Key fields, each a path of column names.
    #[serde(default)]
    pub primary_key: Vec<Vec<String>>,
    /// RFC 3339 timestamp the staging path is derived from. Defaults to the load start.
    #[serde(default)]
    pub write_datetime: Option<String>,
    /// Identifiers of the files already uploaded to the stream's stage.
    #[serde(default)]
    pub staged_files: Vec<String>,
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let required = [
            ("name", &self.name),
            ("output_schema", &self.output_schema),
            ("tmp_table", &self.tmp_table),
            ("final_table", &self.final_table),
            ("sync_mode", &self.sync_mode),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::EmptyField(format!("streams.{field}")));
            }
        }

        if self.tmp_table == self.final_table {
            return Err(ValidationError::TmpTableIsFinalTable(self.to_string()));
        }

        Ok(())
    }
}

impl fmt::Display for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Same as [`LoaderConfig`] but without secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfigWithoutSecrets {
    pub destination: DestinationConfigWithoutSecrets,
    pub staging: StagingConfig,
    pub streams: Vec<StreamConfig>,
}

impl From<LoaderConfig> for LoaderConfigWithoutSecrets {
    fn from(value: LoaderConfig) -> Self {
        LoaderConfigWithoutSecrets {
            destination: value.destination.into(),
            staging: value.staging,
            streams: value.streams,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(name: &str) -> StreamConfig {
        StreamConfig {
            name: name.to_string(),
            namespace: Some("source".to_string()),
            output_schema: "public".to_string(),
            tmp_table: format!("_etl_tmp_{name}"),
            final_table: name.to_string(),
            sync_mode: "append".to_string(),
            primary_key: vec![],
            write_datetime: None,
            staged_files: vec![],
        }
    }

    fn config(streams: Vec<StreamConfig>) -> LoaderConfig {
        LoaderConfig {
            destination: DestinationConfig::Memory,
            staging: StagingConfig::default(),
            streams,
        }
    }

    #[test]
    fn deserializes_with_default_staging() {
        let config: LoaderConfig = serde_json::from_str(
            r#"{
                "destination": "memory",
                "streams": [{
                    "name": "users",
                    "output_schema": "public",
                    "tmp_table": "_etl_tmp_users",
                    "final_table": "users",
                    "sync_mode": "append_dedup",
                    "primary_key": [["id"], ["payload", "tenant"]],
                    "staged_files": ["part-0.jsonl"]
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(config.staging, StagingConfig::default());
        assert_eq!(config.streams[0].primary_key.len(), 2);
        assert_eq!(config.streams[0].namespace, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_empty_stream_list() {
        assert_eq!(config(vec![]).validate(), Err(ValidationError::NoStreams));
    }

    #[test]
    fn rejects_duplicate_streams() {
        let err = config(vec![stream("users"), stream("users")])
            .validate()
            .unwrap_err();

        assert_eq!(err, ValidationError::DuplicateStream("source.users".to_string()));
    }

    #[test]
    fn same_name_in_other_namespace_is_not_a_duplicate() {
        let mut other = stream("users");
        other.namespace = Some("archive".to_string());
        other.tmp_table = "_etl_tmp_archive_users".to_string();
        other.final_table = "archive_users".to_string();

        assert!(config(vec![stream("users"), other]).validate().is_ok());
    }

    #[test]
    fn rejects_empty_and_clashing_tables() {
        let mut empty = stream("users");
        empty.output_schema = " ".to_string();
        assert_eq!(
            config(vec![empty]).validate(),
            Err(ValidationError::EmptyField("streams.output_schema".to_string()))
        );

        let mut clashing = stream("users");
        clashing.tmp_table = "users".to_string();
        assert_eq!(
            config(vec![clashing]).validate(),
            Err(ValidationError::TmpTableIsFinalTable("source.users".to_string()))
        );
    }

    #[test]
    fn config_without_secrets_drops_credentials() {
        let config: LoaderConfig = serde_json::from_str(
            r#"{
                "destination": {"redshift": {
                    "connection": {"host": "cluster", "database": "dev", "username": "loader", "password": "hunter2"},
                    "s3": {"bucket_name": "staging", "bucket_path": "etl", "region": "us-east-1", "access_key_id": "AKIA", "secret_access_key": "s3cret"}
                }},
                "streams": []
            }"#,
        )
        .unwrap();

        let serialized = serde_json::to_string(&LoaderConfigWithoutSecrets::from(config)).unwrap();

        assert!(serialized.contains(r#""host":"cluster""#));
        assert!(serialized.contains(r#""bucket_name":"staging""#));
        assert!(!serialized.contains("hunter2"));
        assert!(!serialized.contains("s3cret"));
        assert!(!serialized.contains("AKIA"));
    }

    #[test]
    fn invalid_staging_fails_validation() {
        let mut config = config(vec![stream("users")]);
        config.staging.max_concurrent_copies = 0;

        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue { .. })
        ));
    }
}
