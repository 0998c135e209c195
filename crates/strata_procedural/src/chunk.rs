//! # Chunk System
//!
//! World data is organized into fixed-size chunks for:
//! - Bounded memory (only chunks near the observer stay resident)
//! - Independent generation and persistence
//! - Compressed storage
//!
//! ## Chunk Format
//!
//! Chunks are 16x128x16 voxels (width x height x depth).
//! Each voxel is stored as a single byte (its [`VoxelType`] ordinal).
//!
//! ## Storage
//!
//! Two interchange forms exist: the LZ4-compressed dense array
//! ([`Chunk::encode_compressed`]) and the sparse record list consumed by
//! persistent stores ([`Chunk::to_records`]).

use std::fmt;

use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use crate::error::{ChunkDataError, ChunkDataResult};

/// Chunk width/depth in voxels.
pub const CHUNK_SIZE: usize = 16;

/// Chunk height in voxels.
pub const CHUNK_HEIGHT: usize = 128;

/// Total voxels per chunk.
pub const VOXELS_PER_CHUNK: usize = CHUNK_SIZE * CHUNK_SIZE * CHUNK_HEIGHT;

/// Type tag of a single voxel.
///
/// Ordinals are part of the persisted format and never change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VoxelType {
    /// Absent voxel.
    #[default]
    Empty = 0,
    /// Sky box cell (never generated, kept for format compatibility).
    SkyBox = 1,
    /// Dirt.
    Dirt = 2,
    /// Grass.
    Grass = 3,
    /// Stone.
    Stone = 4,
    /// Cobblestone.
    CobbleStone = 5,
    /// Gravel.
    Gravel = 6,
}

impl VoxelType {
    /// All voxel types in ordinal order.
    pub const ALL: [Self; 7] = [
        Self::Empty,
        Self::SkyBox,
        Self::Dirt,
        Self::Grass,
        Self::Stone,
        Self::CobbleStone,
        Self::Gravel,
    ];

    /// Decodes a voxel type from its ordinal.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkDataError::UnknownVoxelType`] for ordinals past `Gravel`.
    #[inline]
    pub fn from_u8(value: u8) -> ChunkDataResult<Self> {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(ChunkDataError::UnknownVoxelType(value))
    }

    /// Returns the ordinal.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true for [`VoxelType::Empty`].
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns true for every type except [`VoxelType::Empty`].
    #[inline]
    #[must_use]
    pub const fn is_solid(self) -> bool {
        !self.is_empty()
    }
}

/// Chunk coordinate (identifies a chunk in the world grid).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkCoord {
    /// X coordinate (in chunks, not voxels).
    pub x: i32,
    /// Z coordinate (in chunks, not voxels).
    pub z: i32,
}

impl ChunkCoord {
    /// Creates a new chunk coordinate.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Converts world block coordinates to chunk coordinate.
    #[inline]
    #[must_use]
    pub const fn from_block_pos(block_x: i32, block_z: i32) -> Self {
        Self {
            x: block_x.div_euclid(CHUNK_SIZE as i32),
            z: block_z.div_euclid(CHUNK_SIZE as i32),
        }
    }

    /// Chunk containing a continuous world position.
    #[inline]
    #[must_use]
    pub fn from_world_pos(world_x: f64, world_z: f64) -> Self {
        Self::from_block_pos(world_x.floor() as i32, world_z.floor() as i32)
    }

    /// Returns the world X coordinate of the chunk's origin (corner).
    ///
    /// Saturates for chunks beyond the `i32` block grid.
    #[inline]
    #[must_use]
    pub const fn world_x(self) -> i32 {
        self.x.saturating_mul(CHUNK_SIZE as i32)
    }

    /// Returns the world Z coordinate of the chunk's origin.
    #[inline]
    #[must_use]
    pub const fn world_z(self) -> i32 {
        self.z.saturating_mul(CHUNK_SIZE as i32)
    }

    /// Render offset of this chunk, added to chunk-local instance positions.
    #[inline]
    #[must_use]
    pub fn origin(self) -> [f32; 3] {
        [self.world_x() as f32, 0.0, self.world_z() as f32]
    }

    /// Coordinate shifted by a number of chunks on each axis, clamped to
    /// the grid edge.
    #[inline]
    #[must_use]
    pub const fn offset(self, dx: i32, dz: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            z: self.z.saturating_add(dz),
        }
    }

    /// Chebyshev (chessboard) distance in chunks.
    #[inline]
    #[must_use]
    pub const fn chebyshev_distance(self, other: Self) -> u32 {
        let dx = self.x.abs_diff(other.x);
        let dz = self.z.abs_diff(other.z);
        if dx > dz { dx } else { dz }
    }

    /// The four face-adjacent coordinates: north (-z), south (+z), east (+x), west (-x).
    #[inline]
    #[must_use]
    pub const fn cardinal_neighbors(self) -> [Self; 4] {
        [
            self.offset(0, -1),
            self.offset(0, 1),
            self.offset(1, 0),
            self.offset(-1, 0),
        ]
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Store-assigned identity of a persisted chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub u64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One persisted voxel: its owning chunk and chunk-local position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VoxelRecord {
    /// Owning chunk.
    pub chunk_id: ChunkId,
    /// Local X (0-15).
    pub x_pos: u8,
    /// Y level (0-127).
    pub y_pos: u8,
    /// Local Z (0-15).
    pub z_pos: u8,
    /// Voxel type.
    pub voxel_type: VoxelType,
}

/// A chunk of world data.
///
/// Contains a dense 16x128x16 grid of voxels, indexed as `[x][y][z]`.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    coord: ChunkCoord,
    voxels: Box<[[[VoxelType; CHUNK_SIZE]; CHUNK_HEIGHT]; CHUNK_SIZE]>,
}

impl Chunk {
    /// Creates a new empty chunk at the given coordinates.
    #[must_use]
    pub fn new(coord: ChunkCoord) -> Self {
        Self {
            coord,
            voxels: Box::new([[[VoxelType::Empty; CHUNK_SIZE]; CHUNK_HEIGHT]; CHUNK_SIZE]),
        }
    }

    /// Chunk position in the world.
    #[inline]
    #[must_use]
    pub const fn coord(&self) -> ChunkCoord {
        self.coord
    }

    /// Gets a voxel at local coordinates.
    ///
    /// Out-of-range coordinates read as [`VoxelType::Empty`].
    ///
    /// # Arguments
    ///
    /// * `x` - Local X (0-15)
    /// * `y` - Y level (0-127)
    /// * `z` - Local Z (0-15)
    #[inline]
    #[must_use]
    pub fn get(&self, x: usize, y: usize, z: usize) -> VoxelType {
        if x < CHUNK_SIZE && y < CHUNK_HEIGHT && z < CHUNK_SIZE {
            self.voxels[x][y][z]
        } else {
            VoxelType::Empty
        }
    }

    /// Sets a voxel at local coordinates.
    ///
    /// Returns false (and changes nothing) when the position is out of range.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, voxel: VoxelType) -> bool {
        if x < CHUNK_SIZE && y < CHUNK_HEIGHT && z < CHUNK_SIZE {
            self.voxels[x][y][z] = voxel;
            true
        } else {
            false
        }
    }

    /// Copies out one vertical column, bottom first.
    #[must_use]
    pub fn column(&self, x: usize, z: usize) -> Option<[VoxelType; CHUNK_HEIGHT]> {
        if x >= CHUNK_SIZE || z >= CHUNK_SIZE {
            return None;
        }
        let mut column = [VoxelType::Empty; CHUNK_HEIGHT];
        for (y, slot) in column.iter_mut().enumerate() {
            *slot = self.voxels[x][y][z];
        }
        Some(column)
    }

    /// Overwrites one vertical column, bottom first.
    pub fn set_column(&mut self, x: usize, z: usize, column: &[VoxelType; CHUNK_HEIGHT]) {
        if x >= CHUNK_SIZE || z >= CHUNK_SIZE {
            return;
        }
        for (y, voxel) in column.iter().enumerate() {
            self.voxels[x][y][z] = *voxel;
        }
    }

    /// One past the highest solid voxel in a column (0 for an empty column).
    #[must_use]
    pub fn column_height(&self, x: usize, z: usize) -> usize {
        if x >= CHUNK_SIZE || z >= CHUNK_SIZE {
            return 0;
        }
        (0..CHUNK_HEIGHT)
            .rev()
            .find(|&y| self.voxels[x][y][z].is_solid())
            .map_or(0, |y| y + 1)
    }

    /// Number of non-empty voxels.
    #[must_use]
    pub fn solid_count(&self) -> usize {
        self.voxels
            .iter()
            .flatten()
            .flatten()
            .filter(|v| v.is_solid())
            .count()
    }

    /// Iterates every non-empty voxel as `(x, y, z, type)`.
    pub fn iter_solid(&self) -> impl Iterator<Item = (usize, usize, usize, VoxelType)> + '_ {
        self.voxels.iter().enumerate().flat_map(|(x, plane)| {
            plane.iter().enumerate().flat_map(move |(y, row)| {
                row.iter()
                    .enumerate()
                    .filter(|(_, v)| v.is_solid())
                    .map(move |(z, v)| (x, y, z, *v))
            })
        })
    }

    /// Serializes the dense grid as LZ4-compressed ordinals.
    #[must_use]
    pub fn encode_compressed(&self) -> Vec<u8> {
        let raw: Vec<u8> = self
            .voxels
            .iter()
            .flatten()
            .flatten()
            .map(|v| v.as_u8())
            .collect();
        compress_prepend_size(&raw)
    }

    /// Rebuilds a chunk from [`Self::encode_compressed`] output.
    ///
    /// # Errors
    ///
    /// Returns error if decompression fails, the payload has the wrong size,
    /// or any byte is not a voxel ordinal.
    pub fn decode_compressed(coord: ChunkCoord, bytes: &[u8]) -> ChunkDataResult<Self> {
        let raw = decompress_size_prepended(bytes)
            .map_err(|e| ChunkDataError::Decompression(e.to_string()))?;

        if raw.len() != VOXELS_PER_CHUNK {
            return Err(ChunkDataError::InvalidLength {
                expected: VOXELS_PER_CHUNK,
                actual: raw.len(),
            });
        }

        let mut chunk = Self::new(coord);
        let mut bytes = raw.iter();
        for plane in chunk.voxels.iter_mut() {
            for row in plane.iter_mut() {
                for (slot, &byte) in row.iter_mut().zip(&mut bytes) {
                    *slot = VoxelType::from_u8(byte)?;
                }
            }
        }

        Ok(chunk)
    }

    /// Sparse persisted form: one record per non-empty voxel.
    #[must_use]
    pub fn to_records(&self, chunk_id: ChunkId) -> Vec<VoxelRecord> {
        self.iter_solid()
            .map(|(x, y, z, voxel_type)| VoxelRecord {
                chunk_id,
                x_pos: x as u8,
                y_pos: y as u8,
                z_pos: z as u8,
                voxel_type,
            })
            .collect()
    }

    /// Rebuilds a chunk from its persisted records. Missing positions are empty.
    ///
    /// # Errors
    ///
    /// Returns error if a record lies outside the chunk or the records
    /// disagree about which chunk they belong to.
    pub fn from_records(coord: ChunkCoord, records: &[VoxelRecord]) -> ChunkDataResult<Self> {
        let mut chunk = Self::new(coord);
        let Some(first) = records.first() else {
            return Ok(chunk);
        };

        for record in records {
            if record.chunk_id != first.chunk_id {
                return Err(ChunkDataError::ForeignRecord {
                    expected: first.chunk_id.0,
                    found: record.chunk_id.0,
                });
            }
            let placed = chunk.set(
                usize::from(record.x_pos),
                usize::from(record.y_pos),
                usize::from(record.z_pos),
                record.voxel_type,
            );
            if !placed {
                return Err(ChunkDataError::RecordOutOfBounds {
                    x: record.x_pos,
                    y: record.y_pos,
                    z: record.z_pos,
                });
            }
        }

        Ok(chunk)
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("coord", &self.coord)
            .field("solid", &self.solid_count())
            .finish()
    }
}
