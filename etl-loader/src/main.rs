//! Staged loader binary.
//!
//! Loads a configuration describing one sync, then finalizes its staged files into the
//! destination's final tables and cleans up the temporary tables and stages.

use etl_telemetry::tracing::init_tracing;
use tracing::error;

use crate::config::load_loader_config;
use crate::core::start_loader_with_config;
use crate::error::{LoaderError, LoaderResult};

mod config;
mod core;
mod error;

fn main() -> LoaderResult<()> {
    let loader_config = load_loader_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(LoaderError::config)?;

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_loader_with_config(loader_config));

    if let Err(err) = result {
        error!("{err}");
        eprint!("{}", err.render_report());

        return Err(err);
    }

    Ok(())
}
