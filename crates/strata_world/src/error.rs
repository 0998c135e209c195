//! # World Error Types
//!
//! Errors from resolving chunks and from loading configuration.

use strata_procedural::ChunkDataError;
use strata_store::StoreError;
use thiserror::Error;

/// Errors that can occur while resolving a chunk.
///
/// None of these reach the render loop: the streaming manager records the
/// failure and retries the coordinate on a later tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The store could not answer or rejected a write.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The job was cancelled by eviction or timeout.
    #[error("load cancelled")]
    Cancelled,

    /// Persisted voxels could not be turned back into a chunk.
    #[error("chunk data error: {0}")]
    Data(#[from] ChunkDataError),
}

impl LoadError {
    /// Returns true for cancellations, which are expected and not failures.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type for chunk resolution.
pub type LoadResult<T> = Result<T, LoadError>;

/// Errors that can occur while loading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {message}")]
    Io {
        /// File that was being read.
        path: String,
        /// Underlying error text.
        message: String,
    },

    /// The configuration text is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A value parsed but is out of range.
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while starting the streaming machinery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A worker or service thread could not be spawned.
    #[error("failed to spawn {what} thread: {message}")]
    Spawn {
        /// Which thread.
        what: &'static str,
        /// Underlying error text.
        message: String,
    },
}

impl StreamError {
    /// Wraps a thread spawn failure.
    #[must_use]
    pub fn spawn(what: &'static str, err: &std::io::Error) -> Self {
        Self::Spawn {
            what,
            message: err.to_string(),
        }
    }
}

/// Result type for starting streaming.
pub type StreamResult<T> = Result<T, StreamError>;
