//! Custom error types and result handling for bookbinder operations.
//!
//! This module defines the error handling system used throughout the crate.
//! All fallible operations return a [`Result<T>`] which is a type alias for
//! `std::result::Result<T, Error>`.
//!
//! Tagging failures are soft: they are logged by the pipeline and never surface
//! from [`Pipeline::process`](crate::pipeline::Pipeline::process). The remaining
//! domain variants end the job in the `Failed` state.
use std::path::PathBuf;
use std::time::Duration;

/// Type alias for Results with bookbinder errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all bookbinder operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O errors from the standard library
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Configuration document parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    /// Filesystem notifier errors
    #[error(transparent)]
    Notify(#[from] notify::Error),
    /// Logger installation errors
    #[error(transparent)]
    Logger(#[from] log::SetLoggerError),
    /// Async task join errors
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Semaphore(#[from] tokio::sync::AcquireError),
    #[error(transparent)]
    PipelineBuilder(#[from] crate::pipeline::PipelineBuilderError),
    /// The directory holds no supported audio files
    #[error("Not an audiobook directory (no supported audio files): {0:?}")]
    NotABook(PathBuf),
    /// Copying the source into the job scratch directory failed
    #[error("Failed to stage '{path:?}': {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The external tagging collaborator failed
    #[error("Tagging failed: {0}")]
    Tagging(String),
    /// The external transcoding collaborator failed or had nothing to work on
    #[error("Transcoding '{path:?}' failed: {reason}")]
    Transcode { path: PathBuf, reason: String },
    /// An external tool exceeded its time budget and was killed
    #[error("{tool} timed out after {after:?}")]
    Timeout { tool: String, after: Duration },
    /// Moving the finished file into the output tree failed
    #[error("Failed to commit '{path:?}': {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Invalid configuration values
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// Error for invalid file or directory paths
    #[error("The given path '{0:?}' is invalid: {1}")]
    InvalidPath(PathBuf, String),
    /// Error for failed asynchronous tasks
    #[error("Asynchronous task failed: {0}")]
    AsyncTaskError(String),
    /// Other errors that don't fit into specific categories
    #[error("Other error: {0}")]
    Other(String),
}

// Basic From<String> conversion for convenience
impl From<String> for Error {
    fn from(error: String) -> Self {
        Error::Other(error)
    }
}

impl From<&str> for Error {
    fn from(error: &str) -> Self {
        Error::Other(error.to_string())
    }
}

