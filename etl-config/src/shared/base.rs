use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A numeric field holds a value outside its allowed range.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// A required string field is empty.
    #[error("`{0}` cannot be empty")]
    EmptyField(String),
    /// The temporary table of a stream is the same as its final table.
    #[error("Stream `{0}` uses the same table as temporary and final table")]
    TmpTableIsFinalTable(String),
    /// Two streams share a namespace and name.
    #[error("Stream `{0}` is declared more than once")]
    DuplicateStream(String),
    /// No stream is declared.
    #[error("At least one stream must be declared")]
    NoStreams,
}
