//! # Chunk Data Errors
//!
//! Errors raised when voxel data crosses a boundary: decoding a compressed
//! chunk or rebuilding a chunk from persisted records.

use thiserror::Error;

/// Errors that can occur while decoding or rebuilding chunk data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkDataError {
    /// A byte did not name a known voxel type.
    #[error("unknown voxel type ordinal: {0}")]
    UnknownVoxelType(u8),

    /// Decompressed chunk payload had the wrong size.
    #[error("invalid chunk data size: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Expected byte count.
        expected: usize,
        /// Byte count actually found.
        actual: usize,
    },

    /// LZ4 payload could not be decompressed.
    #[error("chunk decompression failed: {0}")]
    Decompression(String),

    /// A voxel record pointed outside the chunk bounds.
    #[error("voxel record out of bounds: ({x}, {y}, {z})")]
    RecordOutOfBounds {
        /// Local X.
        x: u8,
        /// Y level.
        y: u8,
        /// Local Z.
        z: u8,
    },

    /// A voxel record belonged to a different chunk.
    #[error("voxel record belongs to chunk {found}, expected {expected}")]
    ForeignRecord {
        /// Chunk id the caller asked for.
        expected: u64,
        /// Chunk id carried by the record.
        found: u64,
    },
}

/// Result type for chunk data operations.
pub type ChunkDataResult<T> = Result<T, ChunkDataError>;
