use serde::Serialize;

/// Redshift `COPY` manifest listing the exact files to load.
///
/// Every entry is mandatory so a file missing from the stage fails the copy instead of being
/// skipped silently.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CopyManifest {
    entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct ManifestEntry {
    url: String,
    mandatory: bool,
}

impl CopyManifest {
    /// Lists `staged_files` located under `staging_path` in `bucket_name`.
    pub fn new(bucket_name: &str, staging_path: &str, staged_files: &[String]) -> Self {
        let staging_path = staging_path.trim_matches('/');

        let entries = staged_files
            .iter()
            .map(|file| ManifestEntry {
                url: format!("s3://{bucket_name}/{staging_path}/{}", file.trim_start_matches('/')),
                mandatory: true,
            })
            .collect();

        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
