//! # Terrain Generator
//!
//! Turns a [`NoiseField`] into voxel columns.
//!
//! Each column gets a surface height from the noise value at its world
//! position, then every level below the surface is assigned a material by
//! its depth: a grass cap, a few dirt layers, a gravel band, and stone
//! everywhere beneath.

use crate::chunk::{Chunk, ChunkCoord, VoxelType, CHUNK_HEIGHT, CHUNK_SIZE};
use crate::noise::NoiseField;

/// Depth bands, nearest-surface first. A level `y` belongs to the first band
/// whose `y + depth >= height` holds.
const BANDS: [(usize, VoxelType); 3] = [
    (1, VoxelType::Grass),
    (5, VoxelType::Dirt),
    (10, VoxelType::Gravel),
];

/// Chunk generator driven by a noise height field.
pub struct TerrainGenerator {
    noise: NoiseField,
    amplitude_span: f64,
    sea_level_base: f64,
}

impl TerrainGenerator {
    /// Default height variation above the base level.
    pub const DEFAULT_AMPLITUDE_SPAN: f64 = 4.0;

    /// Default base level (lowest possible surface).
    pub const DEFAULT_SEA_LEVEL_BASE: f64 = 60.0;

    /// Creates a generator with the default height curve.
    #[must_use]
    pub fn new(noise: NoiseField) -> Self {
        Self {
            noise,
            amplitude_span: Self::DEFAULT_AMPLITUDE_SPAN,
            sea_level_base: Self::DEFAULT_SEA_LEVEL_BASE,
        }
    }

    /// Sets the height variation above the base level.
    #[must_use]
    pub fn with_amplitude_span(mut self, span: f64) -> Self {
        self.amplitude_span = span;
        self
    }

    /// Sets the base level.
    #[must_use]
    pub fn with_sea_level_base(mut self, base: f64) -> Self {
        self.sea_level_base = base;
        self
    }

    /// The noise field heights are sampled from.
    #[inline]
    #[must_use]
    pub const fn noise(&self) -> &NoiseField {
        &self.noise
    }

    /// Surface height of a world column, clamped to `[1, CHUNK_HEIGHT]`.
    ///
    /// Levels `0..height` are solid, levels `height..` are empty.
    #[must_use]
    pub fn height_at(&self, world_x: i32, world_z: i32) -> usize {
        let n = self.noise.get_noise(f64::from(world_x), f64::from(world_z));
        let h = ((n + 1.0) / 2.0 * self.amplitude_span + self.sea_level_base).floor();
        h.clamp(1.0, CHUNK_HEIGHT as f64) as usize
    }

    /// Material of level `y` in a column whose surface height is `height`.
    #[inline]
    #[must_use]
    pub fn band_for(y: usize, height: usize) -> VoxelType {
        if y >= height {
            return VoxelType::Empty;
        }
        BANDS
            .iter()
            .find(|(depth, _)| y + depth >= height)
            .map_or(VoxelType::Stone, |(_, voxel)| *voxel)
    }

    /// Generates one column of a chunk, bottom first.
    #[must_use]
    pub fn generate_column(
        &self,
        coord: ChunkCoord,
        local_x: usize,
        local_z: usize,
    ) -> [VoxelType; CHUNK_HEIGHT] {
        let height = self.height_at(
            coord.world_x().saturating_add(local_x as i32),
            coord.world_z().saturating_add(local_z as i32),
        );

        let mut column = [VoxelType::Empty; CHUNK_HEIGHT];
        for (y, slot) in column.iter_mut().enumerate().take(height) {
            *slot = Self::band_for(y, height);
        }
        column
    }

    /// Generates a chunk at the given coordinates.
    #[must_use]
    pub fn generate(&self, coord: ChunkCoord) -> Chunk {
        let mut chunk = Chunk::new(coord);

        for local_x in 0..CHUNK_SIZE {
            for local_z in 0..CHUNK_SIZE {
                let column = self.generate_column(coord, local_x, local_z);
                chunk.set_column(local_x, local_z, &column);
            }
        }

        chunk
    }

    /// Generates a chunk with its columns split across `threads` scoped threads.
    ///
    /// Produces exactly the same chunk as [`Self::generate`]; every column is
    /// written before this returns.
    #[must_use]
    pub fn generate_parallel(&self, coord: ChunkCoord, threads: usize) -> Chunk {
        let threads = threads.clamp(1, CHUNK_SIZE);
        if threads == 1 {
            return self.generate(coord);
        }

        let rows_per_thread = CHUNK_SIZE.div_ceil(threads);
        let mut columns: Vec<(usize, usize, [VoxelType; CHUNK_HEIGHT])> =
            Vec::with_capacity(CHUNK_SIZE * CHUNK_SIZE);

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..CHUNK_SIZE)
                .step_by(rows_per_thread)
                .map(|start| {
                    scope.spawn(move || {
                        let end = (start + rows_per_thread).min(CHUNK_SIZE);
                        let mut out = Vec::with_capacity((end - start) * CHUNK_SIZE);
                        for local_x in start..end {
                            for local_z in 0..CHUNK_SIZE {
                                out.push((
                                    local_x,
                                    local_z,
                                    self.generate_column(coord, local_x, local_z),
                                ));
                            }
                        }
                        out
                    })
                })
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok(rows) => columns.extend(rows),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
        });

        let mut chunk = Chunk::new(coord);
        for (local_x, local_z, column) in &columns {
            chunk.set_column(*local_x, *local_z, column);
        }
        chunk
    }
}
