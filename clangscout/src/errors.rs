/// This module defines the error types for clangscout.
///
/// # Error Tiers
///
/// Errors fall into three tiers, and only the last one ever reaches the caller
/// of a front-end:
///
/// 1. **Per-file problems**
///    A tool that cannot be started, a broken pipe, or a non-empty stderr stream.
///    These are recorded as [`crate::results::FileIssue`] values and the dispatch
///    round carries on with whatever output was captured.
///
/// 2. **Malformed tool output**
///    Never an error at all: the parser degrades to "no matches" for that file.
///
/// 3. **Startup-fatal conditions**
///    Bad configuration, a listener that cannot bind or accept, or a worker pool
///    that cannot be built. These are returned as [`ScoutError`]:
///    ```rust,ignore
///    match QueryServer::bind(":3333", dispatcher, workload) {
///        Ok(server) => server.serve()?,
///        Err(ScoutError::Bind { addr, .. }) => // Address in use,
///        Err(e) => // Anything else,
///    }
///    ```
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for clangscout operations
pub type ScoutResult<T> = Result<T, ScoutError>;

/// Errors that can occur while dispatching queries or serving requests
#[derive(Error, Debug)]
pub enum ScoutError {
    #[error("Failed to start {tool}: {source}")]
    Spawn {
        tool: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to accept connection: {0}")]
    Accept(#[source] io::Error),
    #[error("Worker pool error: {0}")]
    ThreadPool(String),
}

impl ScoutError {
    pub fn spawn(tool: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Spawn {
            tool: tool.into(),
            source,
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn bind(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }

    pub fn thread_pool(msg: impl Into<String>) -> Self {
        Self::ThreadPool(msg.into())
    }
}

impl From<config::ConfigError> for ScoutError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
