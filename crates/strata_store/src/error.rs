//! # Store Error Types
//!
//! All errors a chunk store can report. Absence is never an error: a
//! missing chunk is `Ok(None)`, so any `Err` means the store could not
//! answer.

use strata_procedural::{ChunkDataError, ChunkId};
use thiserror::Error;

use crate::record::ChunkRecord;

/// Errors that can occur in a chunk store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store is unreachable.
    #[error("store offline")]
    Offline,

    /// Filesystem operation failed.
    #[error("store I/O failed while {context}: {message}")]
    Io {
        /// What the store was doing.
        context: &'static str,
        /// Underlying error text.
        message: String,
    },

    /// Persisted data failed validation.
    #[error("store data corrupt: {0}")]
    Corrupt(String),

    /// Another writer already created a chunk at this coordinate.
    #[error("duplicate chunk: {existing} already exists")]
    DuplicateChunk {
        /// The record that won.
        existing: ChunkRecord,
    },

    /// No chunk record carries this id.
    #[error("unknown chunk: {0}")]
    UnknownChunk(ChunkId),

    /// The chunk already has a persisted voxel set.
    #[error("voxels already written for chunk {0}")]
    VoxelsExist(ChunkId),

    /// Voxel records were malformed.
    #[error("invalid voxel data: {0}")]
    Data(#[from] ChunkDataError),
}

impl StoreError {
    /// Wraps an I/O error with the operation that raised it.
    #[must_use]
    pub fn io(context: &'static str, err: &std::io::Error) -> Self {
        Self::Io {
            context,
            message: err.to_string(),
        }
    }

    /// Returns true if retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Offline | Self::Io { .. })
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
