use std::path::PathBuf;
use thiserror::Error;

/// All errors produced inside the dashboard's polling pipeline.
///
/// Polling entry points never surface these to the scheduler; they are
/// logged and converted into an empty or previous result at the boundary.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// An external command ran but reported failure.
    #[error("Command `{program}` failed: {status}")]
    CommandFailed { program: String, status: String },

    /// An external command did not finish within its time budget.
    #[error("Command `{program}` timed out after {secs}s")]
    CommandTimeout { program: String, secs: u64 },

    /// A persisted cache file exists but cannot be used.
    #[error("Corrupt cache {path}: {reason}")]
    CorruptCache { path: PathBuf, reason: String },

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias used throughout the monitor crates.
pub type Result<T> = std::result::Result<T, MonitorError>;
