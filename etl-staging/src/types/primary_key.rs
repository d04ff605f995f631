use serde::{Deserialize, Serialize};
use std::fmt;

/// Path of column names addressing one key field.
///
/// A single-element path is a plain column. A longer path addresses a field nested inside a
/// semi-structured column, for example `["payload", "id"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// Composite primary key used to find superseded rows in append-with-dedup syncs.
///
/// Two rows share a key when every [`KeyPath`] resolves to equal values in both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimaryKey(Vec<KeyPath>);

impl PrimaryKey {
    pub fn new(paths: Vec<KeyPath>) -> Self {
        Self(paths)
    }

    /// Builds a key out of plain (non-nested) column names.
    pub fn from_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            columns
                .into_iter()
                .map(|column| KeyPath::new([column]))
                .collect(),
        )
    }

    pub fn paths(&self) -> &[KeyPath] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Vec<String>>> for PrimaryKey {
    fn from(paths: Vec<Vec<String>>) -> Self {
        Self(paths.into_iter().map(KeyPath).collect())
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        write!(f, "({rendered})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_nested_paths() {
        let key: PrimaryKey = vec![
            vec!["id".to_string()],
            vec!["payload".to_string(), "tenant".to_string()],
        ]
        .into();

        assert_eq!(key.to_string(), "(id, payload.tenant)");
        assert_eq!(key.paths()[1].segments(), ["payload", "tenant"]);
    }

    #[test]
    fn deserializes_from_nested_lists() {
        let key: PrimaryKey = serde_json::from_str(r#"[["id"], ["region"]]"#).unwrap();

        assert_eq!(key, PrimaryKey::from_columns(["id", "region"]));
    }
}
