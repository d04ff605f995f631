//! Configuration types shared by the loader and destinations.

mod base;
mod connection;
mod destination;
mod loader;
mod staging;

pub use base::ValidationError;
pub use connection::{
    ETL_LOADER_OPTIONS, RedshiftConnectionConfig, RedshiftConnectionConfigWithoutSecrets,
    RedshiftConnectionOptions, S3StagingConfig, S3StagingConfigWithoutSecrets,
};
pub use destination::{DestinationConfig, DestinationConfigWithoutSecrets};
pub use loader::{LoaderConfig, LoaderConfigWithoutSecrets, StreamConfig};
pub use staging::StagingConfig;
