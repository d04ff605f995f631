use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings of the finalization step that moves staged files into final tables.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StagingConfig {
    /// Whether stages are dropped during cleanup once the sync is closed.
    #[serde(default = "default_purge_staging_data")]
    pub purge_staging_data: bool,
    /// Maximum number of copies from a stage into temporary tables running at the same time.
    #[serde(default = "default_max_concurrent_copies")]
    pub max_concurrent_copies: usize,
    /// Time limit of a single copy in milliseconds. No limit when unset.
    #[serde(default)]
    pub copy_timeout_ms: Option<u64>,
}

impl StagingConfig {
    pub const DEFAULT_PURGE_STAGING_DATA: bool = true;

    /// Copies run one at a time in stream order by default.
    pub const DEFAULT_MAX_CONCURRENT_COPIES: usize = 1;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent_copies == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "staging.max_concurrent_copies".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.copy_timeout_ms == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "staging.copy_timeout_ms".to_string(),
                constraint: "must be greater than 0 when set".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            purge_staging_data: default_purge_staging_data(),
            max_concurrent_copies: default_max_concurrent_copies(),
            copy_timeout_ms: None,
        }
    }
}

const fn default_purge_staging_data() -> bool {
    StagingConfig::DEFAULT_PURGE_STAGING_DATA
}

const fn default_max_concurrent_copies() -> usize {
    StagingConfig::DEFAULT_MAX_CONCURRENT_COPIES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: StagingConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config, StagingConfig::default());
        assert!(config.purge_staging_data);
        assert_eq!(config.max_concurrent_copies, 1);
        assert_eq!(config.copy_timeout_ms, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = StagingConfig {
            max_concurrent_copies: 0,
            ..StagingConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue { field, .. }) if field == "staging.max_concurrent_copies"
        ));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = StagingConfig {
            copy_timeout_ms: Some(0),
            ..StagingConfig::default()
        };

        assert!(config.validate().is_err());

        let config = StagingConfig {
            copy_timeout_ms: Some(30_000),
            ..StagingConfig::default()
        };

        assert!(config.validate().is_ok());
    }
}
