//! # STRATA World Streaming
//!
//! Keeps an endless voxel world loaded around a moving observer.
//!
//! ## Architecture
//!
//! ```text
//!   Observer ──> StreamingService (tick thread)
//!                    │
//!                    └── StreamingManager ──> WorkerPool ──> ChunkLoader ──> ChunkStore
//!                              │                                  │
//!                              └──────── World <── publish ───────┘
//!                                          │
//!                           render_snapshot / is_occupied / find_nearest_voxels
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use strata_store::MemoryStore;
//! use strata_world::{StreamingManager, WorldConfig};
//!
//! let config = WorldConfig {
//!     render_radius: 1,
//!     ..WorldConfig::default()
//! };
//! let mut manager = StreamingManager::new(&config, Arc::new(MemoryStore::new())).unwrap();
//!
//! assert!(manager.settle(0.0, 0.0, Duration::from_secs(60)));
//! assert_eq!(manager.world().len(), 9);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod loader;
pub mod pool;
pub mod service;
pub mod streaming;
pub mod ticker;
pub mod world;

pub use config::{WorldConfig, MAX_RENDER_RADIUS, MAX_WORKER_THREADS};
pub use error::{ConfigError, ConfigResult, LoadError, LoadResult, StreamError, StreamResult};
pub use loader::{CancelToken, ChunkLoader, JobPhase, LoadOrigin, LoadOutcome};
pub use pool::{ChunkJob, JobResult, WorkerPool};
pub use service::{Observer, StreamingService};
pub use streaming::{ChunkState, StreamStats, StreamingManager};
pub use ticker::{TickClock, TickStats};
pub use world::{LoadedChunk, RenderChunk, World};
