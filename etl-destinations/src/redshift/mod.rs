//! Redshift destination with S3 stages.

mod core;
mod error;
mod manifest;
mod sql;

pub use self::core::RedshiftStagingOperations;
pub use error::{object_store_error_to_etl_error, sqlx_error_to_etl_error};
pub use manifest::CopyManifest;
