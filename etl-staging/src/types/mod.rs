//! Core value types shared by the finalizer and every staging implementation.

mod connection;
mod primary_key;
mod stream;
mod sync_mode;
mod write_config;

pub use connection::ConnectionId;
pub use primary_key::{KeyPath, PrimaryKey};
pub use stream::StreamId;
pub use sync_mode::SyncMode;
pub use write_config::{StagedFiles, WriteConfig};
