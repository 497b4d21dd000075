//! Error types for each stage of the pre-rendering pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single render session.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Render timed out after {0}ms")]
    Timeout(u64),

    #[error("Completion marker not observed after {polls} polls")]
    SettleLimit { polls: u32 },

    #[error("Script error: {0}")]
    Script(String),

    #[error("JavaScript execution error: {0}")]
    Js(String),

    #[error("Render exceeded its {limit_mb} MiB heap limit")]
    HeapLimit { limit_mb: usize },

    #[error("Route table rejected: {0}")]
    Routes(#[from] RouteError),

    #[error("Resource sandbox setup failed: {0}")]
    Sandbox(#[from] ResourceError),

    #[error("Render worker exited before replying")]
    WorkerGone,
}

impl RenderError {
    /// Both the hard timer and the poll cap count as timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RenderError::Timeout(_) | RenderError::SettleLimit { .. })
    }
}

/// Failure to resolve a resource requested by a render session.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("No strategy could resolve {0}")]
    NotFound(String),

    #[error("Request to '{url}' blocked: {reason}")]
    Blocked { url: String, reason: String },

    #[error("Fetch of '{url}' failed: {reason}")]
    Network { url: String, reason: String },

    #[error("Fetch of '{url}' returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Malformed data URL: {0}")]
    DataUrl(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A route table published by the application that cannot be used.
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Route table is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Prototype pollution attempt: '{0}' key is forbidden in route table")]
    ForbiddenKey(String),

    #[error("Route table nesting too deep (max {0} levels)")]
    TooDeep(usize),

    #[error("Unsafe output filename '{0}'")]
    UnsafeFilename(String),
}

/// Failure while writing rendered pages to disk.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Compression failed for {path}: {source}")]
    Compress {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of the bundling step that precedes pre-rendering.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Build command is empty")]
    EmptyCommand,

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}")]
    Failed { command: String, status: String },
}

/// Invalid configuration values.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;
