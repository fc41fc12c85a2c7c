use std::path::PathBuf;
use thiserror::Error;

/// Infrastructure errors: configuration, state files, locking, parsing.
///
/// Run-level outcomes (preflight, conversion, external steps) are reported
/// through [`crate::orchestrator::DemuxFailure`] instead, so one run failing
/// never aborts the whole cycle.
#[derive(Debug, Error)]
pub enum SeqwatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error on {}: {source}", .path.display())]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid run id: {0}")]
    RunId(String),

    #[error("RunInfo error in {}: {message}", .path.display())]
    RunInfo { path: PathBuf, message: String },

    #[error("Another instance holds the lock {} ({})", .path.display(), holder(.pid))]
    LockHeld { path: PathBuf, pid: Option<u32> },

    #[error("Stale lock file {} left by pid {pid}, investigate the last error then remove it", .path.display())]
    StaleLock { path: PathBuf, pid: u32 },

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Error: {0}")]
    Other(String),
}

fn holder(pid: &Option<u32>) -> String {
    match pid {
        Some(pid) => format!("pid {}", pid),
        None => "pid not readable".to_string(),
    }
}

impl SeqwatchError {
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SeqwatchError::IoAt {
            path: path.into(),
            source,
        }
    }
}

impl From<String> for SeqwatchError {
    fn from(err: String) -> Self {
        SeqwatchError::Other(err)
    }
}

impl From<&str> for SeqwatchError {
    fn from(err: &str) -> Self {
        SeqwatchError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SeqwatchError>;
