//! # Chunk Store Contract
//!
//! The persistence seam between streaming and storage. A store answers
//! three questions: does a chunk exist at this coordinate, what voxels does
//! a chunk hold, and how many chunks are there. It accepts two writes: a new
//! chunk identity and that chunk's voxel set.
//!
//! ## Rules every implementation follows
//!
//! - `find_chunk` returns `Ok(None)` only for a definite miss.
//! - `insert_chunk` enforces one record per coordinate and reports the
//!   winner through [`StoreError::DuplicateChunk`].
//! - `insert_voxels` writes the whole set or nothing, once per chunk.
//!
//! [`StoreError::DuplicateChunk`]: crate::error::StoreError::DuplicateChunk

use strata_procedural::{ChunkCoord, ChunkId, VoxelRecord};

use crate::error::StoreResult;
use crate::record::ChunkRecord;

/// Durable storage for chunk identities and voxel sets.
///
/// Implementations are shared across worker threads.
pub trait ChunkStore: Send + Sync {
    /// Looks up the chunk record at a coordinate.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot answer. Absence is `Ok(None)`.
    fn find_chunk(&self, coord: ChunkCoord) -> StoreResult<Option<ChunkRecord>>;

    /// Creates the chunk record for a coordinate with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateChunk` if the coordinate already has a record.
    fn insert_chunk(&self, coord: ChunkCoord) -> StoreResult<ChunkRecord>;

    /// Persists the full voxel set of a chunk.
    ///
    /// # Errors
    ///
    /// Returns `UnknownChunk` for an id with no record, `VoxelsExist` when a
    /// set was already written, and `Data` for malformed records. Nothing is
    /// written on error.
    fn insert_voxels(&self, chunk_id: ChunkId, voxels: &[VoxelRecord]) -> StoreResult<()>;

    /// Reads every voxel record of a chunk. A chunk with no voxel set yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns `UnknownChunk` for an id with no record.
    fn voxels_for_chunk(&self, chunk_id: ChunkId) -> StoreResult<Vec<VoxelRecord>>;

    /// Number of chunk records.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot answer.
    fn chunk_count(&self) -> StoreResult<usize>;
}
