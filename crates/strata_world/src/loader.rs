//! # Chunk Loader
//!
//! Resolves one chunk coordinate against the store:
//!
//! ```text
//!   find_chunk ──hit──> voxels_for_chunk ──non-empty──> Loaded
//!       │                     └──empty──> generate, write voxels ──> Repaired
//!       └──miss──> generate ──> insert_chunk ──> insert_voxels ──> Generated
//!                                    └──duplicate──> load the winner's record
//! ```
//!
//! A store error at any step aborts the attempt. In particular a failed
//! lookup is never treated as a miss, so existing data is never regenerated
//! over.
//!
//! The loader is shared by every worker thread and holds no per-job state.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use strata_procedural::{Chunk, ChunkCoord, ChunkId, TerrainGenerator};
use strata_store::{ChunkRecord, ChunkStore, StoreError};

use crate::error::{LoadError, LoadResult};

/// What a job is currently doing, as seen by the streaming manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum JobPhase {
    /// Waiting for a worker.
    Queued = 0,
    /// Asking the store whether the chunk exists.
    Checking = 3,
    /// Reading a persisted voxel set.
    Loading = 1,
    /// Running the terrain generator.
    Generating = 2,
}

impl JobPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Loading,
            2 => Self::Generating,
            3 => Self::Checking,
            _ => Self::Queued,
        }
    }
}

#[derive(Debug)]
struct TokenInner {
    cancelled: AtomicBool,
    phase: AtomicU8,
    started: Mutex<Option<Instant>>,
}

/// Shared cancellation flag and progress marker for one chunk job.
///
/// Clones share state. The streaming manager keeps one clone and hands the
/// other to the worker.
#[derive(Clone, Debug)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Creates a live token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                phase: AtomicU8::new(JobPhase::Queued as u8),
                started: Mutex::new(None),
            }),
        }
    }

    /// Requests cancellation. The worker stops at its next store round-trip.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`Self::cancel`] has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with [`LoadError::Cancelled`] if the job was cancelled.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` after [`Self::cancel`].
    pub fn check(&self) -> LoadResult<()> {
        if self.is_cancelled() {
            Err(LoadError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Records the job's current phase.
    pub fn set_phase(&self, phase: JobPhase) {
        self.inner.phase.store(phase as u8, Ordering::Release);
    }

    /// The job's most recently recorded phase.
    #[must_use]
    pub fn phase(&self) -> JobPhase {
        JobPhase::from_u8(self.inner.phase.load(Ordering::Acquire))
    }

    /// Stamps the moment a worker took the job. Later calls keep the first stamp.
    pub fn mark_started(&self) {
        let mut started = self.inner.started.lock();
        if started.is_none() {
            *started = Some(Instant::now());
        }
    }

    /// When a worker took the job, or `None` while it is still queued.
    #[must_use]
    pub fn started(&self) -> Option<Instant> {
        *self.inner.started.lock()
    }
}

/// How a resolved chunk came to be in memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadOrigin {
    /// Generated and persisted for the first time.
    Generated,
    /// Read back from the store.
    Loaded,
    /// The store had a record with no voxels; regenerated under the same id.
    Repaired,
}

/// A fully populated chunk, ready to publish.
#[derive(Clone, Debug)]
pub struct LoadOutcome {
    /// The voxels.
    pub chunk: Chunk,
    /// Store identity of the chunk.
    pub chunk_id: ChunkId,
    /// Which path produced it.
    pub origin: LoadOrigin,
}

/// Resolves chunk coordinates to populated chunks through a store.
pub struct ChunkLoader {
    store: Arc<dyn ChunkStore>,
    terrain: Arc<TerrainGenerator>,
}

impl ChunkLoader {
    /// Creates a loader over a store and a terrain generator.
    #[must_use]
    pub fn new(store: Arc<dyn ChunkStore>, terrain: Arc<TerrainGenerator>) -> Self {
        Self { store, terrain }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// The terrain generator used for missing chunks.
    #[must_use]
    pub fn terrain(&self) -> &Arc<TerrainGenerator> {
        &self.terrain
    }

    /// Loads the chunk at `coord`, generating and persisting it if the store has none.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if `token` is cancelled before a store round-trip,
    /// `Store` when the store fails, and `Data` when persisted voxels are malformed.
    pub fn resolve(&self, coord: ChunkCoord, token: &CancelToken) -> LoadResult<LoadOutcome> {
        token.check()?;
        token.set_phase(JobPhase::Checking);
        match self.store.find_chunk(coord)? {
            Some(record) => self.load_existing(record, token),
            None => self.generate_new(coord, token),
        }
    }

    fn load_existing(&self, record: ChunkRecord, token: &CancelToken) -> LoadResult<LoadOutcome> {
        token.set_phase(JobPhase::Loading);
        token.check()?;
        let voxels = self.store.voxels_for_chunk(record.id)?;

        if !voxels.is_empty() {
            return Ok(LoadOutcome {
                chunk: Chunk::from_records(record.coord(), &voxels)?,
                chunk_id: record.id,
                origin: LoadOrigin::Loaded,
            });
        }

        // A record with no voxels: an earlier attempt died between the two writes.
        tracing::warn!(
            "Chunk {} has no persisted voxels, regenerating under {}",
            record.coord(),
            record.id
        );
        token.set_phase(JobPhase::Generating);
        let chunk = self.terrain.generate(record.coord());
        token.check()?;
        self.persist_voxels(&chunk, record.id)?;

        Ok(LoadOutcome {
            chunk,
            chunk_id: record.id,
            origin: LoadOrigin::Repaired,
        })
    }

    fn generate_new(&self, coord: ChunkCoord, token: &CancelToken) -> LoadResult<LoadOutcome> {
        token.set_phase(JobPhase::Generating);
        let chunk = self.terrain.generate(coord);

        token.check()?;
        let record = match self.store.insert_chunk(coord) {
            Ok(record) => record,
            Err(StoreError::DuplicateChunk { existing }) => {
                tracing::warn!(
                    "Chunk {} was created concurrently as {}, loading it instead",
                    coord,
                    existing.id
                );
                return self.load_existing(existing, token);
            }
            Err(e) => return Err(e.into()),
        };

        token.check()?;
        self.persist_voxels(&chunk, record.id)?;

        Ok(LoadOutcome {
            chunk,
            chunk_id: record.id,
            origin: LoadOrigin::Generated,
        })
    }

    /// Writes a chunk's voxel set. Losing a write race is fine: generation is
    /// deterministic, so the winner wrote the same voxels.
    fn persist_voxels(&self, chunk: &Chunk, chunk_id: ChunkId) -> LoadResult<()> {
        match self.store.insert_voxels(chunk_id, &chunk.to_records(chunk_id)) {
            Ok(()) => Ok(()),
            Err(StoreError::VoxelsExist(id)) => {
                tracing::debug!("Voxels for {} already written by another worker", id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
