//! # STRATA Chunk Store
//!
//! Durable storage for generated chunks.
//!
//! A store holds two kinds of record:
//! - **Chunk records** (`ChunkRecord`): one per coordinate, the existence check
//! - **Voxel records** (`VoxelRecord`): one per non-empty voxel, keyed by chunk id
//!
//! ## Implementations
//!
//! - `MemoryStore`: hash maps behind a lock, with simulated connectivity loss
//! - `DiskStore`: CRC-checked append-only index plus one LZ4 file per chunk
//!
//! ## Example
//!
//! ```rust
//! use strata_store::{ChunkStore, MemoryStore, StoreError};
//! use strata_procedural::ChunkCoord;
//!
//! let store = MemoryStore::new();
//! let coord = ChunkCoord::new(0, 0);
//!
//! assert_eq!(store.find_chunk(coord).unwrap(), None);
//! let record = store.insert_chunk(coord).unwrap();
//!
//! // A second insert for the same coordinate loses the race.
//! assert_eq!(
//!     store.insert_chunk(coord),
//!     Err(StoreError::DuplicateChunk { existing: record })
//! );
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]

pub mod disk;
pub mod error;
pub mod memory;
pub mod record;
pub mod store;

pub use disk::DiskStore;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use record::{validate_voxels, ChunkRecord};
pub use store::ChunkStore;
pub use strata_procedural::{ChunkId, VoxelRecord};
