//! # STRATA Procedural Generation
//!
//! Deterministic voxel terrain for an endless, reproducible world.
//!
//! ## Design Principles
//!
//! 1. **Deterministic**: Same non-zero seed always produces the same world
//! 2. **Chunked**: World is generated in fixed 16x128x16 chunks
//! 3. **Independent**: Chunks can be generated, culled and discarded on their own
//! 4. **Renderer-agnostic**: Output is plain instance data, no GPU types
//!
//! ## Core Components
//!
//! - `NoiseField`: Seeded multi-octave simplex height noise
//! - `TerrainGenerator`: Height curve plus depth banding into voxel columns
//! - `Chunk`: Dense voxel storage with compressed and record forms
//! - `compute_instances`: Face culling into per-voxel render instances
//!
//! ## Example
//!
//! ```rust
//! use strata_procedural::{
//!     compute_instances, ChunkCoord, Neighbors, NoiseField, TerrainGenerator, WorldSeed,
//! };
//!
//! let noise = NoiseField::new(WorldSeed::new(200), 255.0, 0.5);
//! let terrain = TerrainGenerator::new(noise);
//!
//! let chunk = terrain.generate(ChunkCoord::new(0, 0));
//! let instances = compute_instances(&chunk, &Neighbors::none());
//! assert!(!instances.is_empty());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod chunk;
pub mod error;
pub mod noise;
pub mod terrain;
pub mod visibility;

pub use chunk::{
    Chunk, ChunkCoord, ChunkId, VoxelRecord, VoxelType, CHUNK_HEIGHT, CHUNK_SIZE, VOXELS_PER_CHUNK,
};
pub use error::{ChunkDataError, ChunkDataResult};
pub use noise::{NoiseField, SimplexNoise, WorldSeed};
pub use terrain::TerrainGenerator;
pub use visibility::{compute_instances, is_exposed, Neighbors, VisibleInstance};
