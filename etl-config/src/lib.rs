//! Configuration types and loading for the staged loader.
//!
//! Configuration is read from `configuration/base.*`, then from the file named after the
//! runtime [`Environment`], then from `APP_`-prefixed environment variables.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
