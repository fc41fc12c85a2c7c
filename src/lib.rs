pub mod cycle;
pub mod discovery;
pub mod disk;
pub mod error;
pub mod instance_lock;
pub mod lifecycle;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod preflight;
pub mod processed_set;
pub mod report;
pub mod run_id;
pub mod run_info;
pub mod sample_sheet;
pub mod settings;
pub mod steps;

pub use error::*;
pub use processed_set::{FileProcessedSet, MemoryProcessedSet, ProcessedSetStore, Stage};
pub use run_id::RunId;
pub use settings::Settings;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber: stderr, plus `log_file` when given.
/// `RUST_LOG` overrides the default `info` level.
pub fn init_tracing(service: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| SeqwatchError::io_at(path, e))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| SeqwatchError::Other(format!("cannot install tracing subscriber: {}", e)))?;
    tracing::debug!(service, "tracing initialised");
    Ok(())
}
