//! # STRATA
//!
//! An endless, deterministic voxel world streamed around an observer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                              STRATA                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────┐  │
//! │  │  procedural      │   │  world           │   │  store       │  │
//! │  │                  │──>│                  │──>│              │  │
//! │  │  • Noise         │   │  • Streaming     │   │  • Memory    │  │
//! │  │  • Terrain       │   │  • Worker pool   │   │  • Disk      │  │
//! │  │  • Face culling  │   │  • Queries       │   │              │  │
//! │  └──────────────────┘   └──────────────────┘   └──────────────┘  │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `walk`: scripted observer movement for the headless server
//! - `endpoint`: TCP chunk requests answered with visible voxels

pub mod endpoint;
pub mod walk;

use std::sync::Arc;

pub use strata_procedural as procedural;
pub use strata_store as store;
pub use strata_world as world;

pub use endpoint::{ChunkClient, ChunkEndpoint, ChunkSource, EndpointError, ServedChunk};
pub use walk::ScriptedWalk;

use strata_store::{ChunkStore, DiskStore, MemoryStore, StoreResult};
use strata_world::WorldConfig;

/// Opens the store named by `config`: on disk if `store_path` is set,
/// otherwise in memory.
///
/// # Errors
///
/// Returns the store's error if the on-disk store cannot be opened.
pub fn open_store(config: &WorldConfig) -> StoreResult<Arc<dyn ChunkStore>> {
    match &config.store_path {
        Some(path) => {
            let store = DiskStore::open(path)?;
            tracing::info!(
                "Opened chunk store at {} ({} chunks)",
                path.display(),
                store.chunk_count()?
            );
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("Using in-memory chunk store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
