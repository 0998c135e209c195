//! Persisted record shapes.

use std::fmt;

use strata_procedural::{ChunkCoord, ChunkDataError, ChunkId, VoxelRecord, CHUNK_HEIGHT, CHUNK_SIZE};

/// Identity record of a persisted chunk, one per coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkRecord {
    /// Store-assigned identity.
    pub id: ChunkId,
    /// Chunk X coordinate.
    pub x_pos: i32,
    /// Chunk Z coordinate.
    pub z_pos: i32,
}

impl ChunkRecord {
    /// Creates a record for a coordinate.
    #[inline]
    #[must_use]
    pub const fn new(id: ChunkId, coord: ChunkCoord) -> Self {
        Self {
            id,
            x_pos: coord.x,
            z_pos: coord.z,
        }
    }

    /// The coordinate this record identifies.
    #[inline]
    #[must_use]
    pub const fn coord(&self) -> ChunkCoord {
        ChunkCoord::new(self.x_pos, self.z_pos)
    }
}

impl fmt::Display for ChunkRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk {} at ({}, {})", self.id, self.x_pos, self.z_pos)
    }
}

/// Checks that every record belongs to `chunk_id` and lies inside a chunk.
///
/// # Errors
///
/// Returns the first offending record as a [`ChunkDataError`].
pub fn validate_voxels(chunk_id: ChunkId, voxels: &[VoxelRecord]) -> Result<(), ChunkDataError> {
    for voxel in voxels {
        if voxel.chunk_id != chunk_id {
            return Err(ChunkDataError::ForeignRecord {
                expected: chunk_id.0,
                found: voxel.chunk_id.0,
            });
        }
        if usize::from(voxel.x_pos) >= CHUNK_SIZE
            || usize::from(voxel.y_pos) >= CHUNK_HEIGHT
            || usize::from(voxel.z_pos) >= CHUNK_SIZE
        {
            return Err(ChunkDataError::RecordOutOfBounds {
                x: voxel.x_pos,
                y: voxel.y_pos,
                z: voxel.z_pos,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_procedural::VoxelType;

    fn voxel(chunk: u64, x: u8, y: u8, z: u8) -> VoxelRecord {
        VoxelRecord {
            chunk_id: ChunkId(chunk),
            x_pos: x,
            y_pos: y,
            z_pos: z,
            voxel_type: VoxelType::Dirt,
        }
    }

    #[test]
    fn test_record_coord() {
        let record = ChunkRecord::new(ChunkId(3), ChunkCoord::new(-4, 9));
        assert_eq!(record.coord(), ChunkCoord::new(-4, 9));
        assert_eq!((record.x_pos, record.z_pos), (-4, 9));
    }

    #[test]
    fn test_validate_voxels() {
        assert!(validate_voxels(ChunkId(1), &[voxel(1, 15, 127, 15)]).is_ok());
        assert_eq!(
            validate_voxels(ChunkId(1), &[voxel(2, 0, 0, 0)]),
            Err(ChunkDataError::ForeignRecord { expected: 1, found: 2 })
        );
        assert_eq!(
            validate_voxels(ChunkId(1), &[voxel(1, 16, 0, 0)]),
            Err(ChunkDataError::RecordOutOfBounds { x: 16, y: 0, z: 0 })
        );
    }
}
