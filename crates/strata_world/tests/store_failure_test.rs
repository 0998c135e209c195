//! # Store Failure Tests
//!
//! Connectivity loss, slow stores and racing writers must never lose or
//! duplicate chunk data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use strata_procedural::{ChunkCoord, ChunkId, NoiseField, TerrainGenerator, VoxelRecord, WorldSeed};
use strata_store::{ChunkRecord, ChunkStore, MemoryStore, StoreResult};
use strata_world::{CancelToken, ChunkLoader, ChunkState, LoadOrigin, StreamingManager, WorldConfig};

/// Answers every existence check with "absent", so every caller races to create.
struct StaleIndexStore {
    inner: MemoryStore,
}

impl ChunkStore for StaleIndexStore {
    fn find_chunk(&self, _coord: ChunkCoord) -> StoreResult<Option<ChunkRecord>> {
        Ok(None)
    }

    fn insert_chunk(&self, coord: ChunkCoord) -> StoreResult<ChunkRecord> {
        self.inner.insert_chunk(coord)
    }

    fn insert_voxels(&self, chunk_id: ChunkId, voxels: &[VoxelRecord]) -> StoreResult<()> {
        self.inner.insert_voxels(chunk_id, voxels)
    }

    fn voxels_for_chunk(&self, chunk_id: ChunkId) -> StoreResult<Vec<VoxelRecord>> {
        self.inner.voxels_for_chunk(chunk_id)
    }

    fn chunk_count(&self) -> StoreResult<usize> {
        self.inner.chunk_count()
    }
}

/// Delays every existence check by a configurable amount.
struct SlowStore {
    inner: MemoryStore,
    delay_ms: AtomicU64,
}

impl ChunkStore for SlowStore {
    fn find_chunk(&self, coord: ChunkCoord) -> StoreResult<Option<ChunkRecord>> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        self.inner.find_chunk(coord)
    }

    fn insert_chunk(&self, coord: ChunkCoord) -> StoreResult<ChunkRecord> {
        self.inner.insert_chunk(coord)
    }

    fn insert_voxels(&self, chunk_id: ChunkId, voxels: &[VoxelRecord]) -> StoreResult<()> {
        self.inner.insert_voxels(chunk_id, voxels)
    }

    fn voxels_for_chunk(&self, chunk_id: ChunkId) -> StoreResult<Vec<VoxelRecord>> {
        self.inner.voxels_for_chunk(chunk_id)
    }

    fn chunk_count(&self) -> StoreResult<usize> {
        self.inner.chunk_count()
    }
}

fn terrain() -> Arc<TerrainGenerator> {
    Arc::new(TerrainGenerator::new(NoiseField::new(WorldSeed::new(200), 255.0, 0.5)))
}

fn config(radius: u32) -> WorldConfig {
    WorldConfig {
        render_radius: radius,
        worker_threads: 4,
        ..WorldConfig::default()
    }
}

/// Test: The losing writer loads the winner's chunk instead of duplicating it.
#[test]
fn test_duplicate_race_sequential() {
    let store = Arc::new(StaleIndexStore {
        inner: MemoryStore::new(),
    });
    let loader = ChunkLoader::new(Arc::clone(&store) as Arc<dyn ChunkStore>, terrain());
    let coord = ChunkCoord::new(4, -4);

    let winner = loader.resolve(coord, &CancelToken::new()).unwrap();
    let loser = loader.resolve(coord, &CancelToken::new()).unwrap();

    assert_eq!(winner.origin, LoadOrigin::Generated);
    assert_eq!(loser.origin, LoadOrigin::Loaded);
    assert_eq!(loser.chunk_id, winner.chunk_id);
    assert_eq!(loser.chunk, winner.chunk);
    assert_eq!(store.chunk_count().unwrap(), 1);
}

/// Test: Many workers racing on one coordinate agree on a single record.
#[test]
fn test_duplicate_race_concurrent() {
    const RACERS: usize = 8;

    let store = Arc::new(StaleIndexStore {
        inner: MemoryStore::new(),
    });
    let loader = Arc::new(ChunkLoader::new(
        Arc::clone(&store) as Arc<dyn ChunkStore>,
        terrain(),
    ));
    let barrier = Arc::new(Barrier::new(RACERS));
    let coord = ChunkCoord::new(0, 0);

    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let loader = Arc::clone(&loader);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                loader.resolve(coord, &CancelToken::new()).unwrap()
            })
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let generated = outcomes
        .iter()
        .filter(|o| o.origin == LoadOrigin::Generated)
        .count();
    println!(
        "Origins: {:?}",
        outcomes.iter().map(|o| o.origin).collect::<Vec<_>>()
    );
    assert_eq!(generated, 1, "Exactly one racer creates the record");
    assert!(outcomes.iter().all(|o| o.chunk_id == outcomes[0].chunk_id));
    assert!(outcomes.iter().all(|o| o.chunk == outcomes[0].chunk));

    assert_eq!(store.chunk_count().unwrap(), 1);
    assert_eq!(store.inner.voxel_count(), outcomes[0].chunk.solid_count());
}

/// Test: An offline store leaves chunks requested and they load once it returns.
#[test]
fn test_offline_store_retries() {
    let store = Arc::new(MemoryStore::new());
    store.set_offline(true);
    let mut manager =
        StreamingManager::new(&config(1), Arc::clone(&store) as Arc<dyn ChunkStore>).unwrap();

    assert!(!manager.settle(0.0, 0.0, Duration::from_millis(500)));
    let stats = manager.stats();
    println!("While offline: {stats:?}");
    assert!(stats.failed > 0);
    assert!(manager.world().is_empty());
    assert_ne!(manager.state(ChunkCoord::new(0, 0)), ChunkState::Loaded);

    store.set_offline(false);
    assert_eq!(store.chunk_count().unwrap(), 0, "A failed lookup must never write");

    assert!(manager.settle(0.0, 0.0, Duration::from_secs(120)));
    assert_eq!(manager.world().len(), 9);
    assert_eq!(store.chunk_count().unwrap(), 9);
    assert_eq!(manager.stats().generated, 9);
}

/// Test: Jobs stuck past the store timeout are cancelled and retried.
#[test]
fn test_slow_store_times_out_and_recovers() {
    let store = Arc::new(SlowStore {
        inner: MemoryStore::new(),
        delay_ms: AtomicU64::new(400),
    });
    let impatient = WorldConfig {
        store_timeout_ms: 50,
        ..config(1)
    };
    let mut manager =
        StreamingManager::new(&impatient, Arc::clone(&store) as Arc<dyn ChunkStore>).unwrap();

    assert!(!manager.settle(0.0, 0.0, Duration::from_millis(300)));
    let stats = manager.stats();
    println!("While slow: {stats:?}");
    assert!(stats.timed_out > 0);

    store.delay_ms.store(0, Ordering::SeqCst);
    assert!(manager.settle(0.0, 0.0, Duration::from_secs(120)));
    assert_eq!(manager.world().len(), 9);
    assert_eq!(store.chunk_count().unwrap(), 9, "Retries must not duplicate records");
}

/// Test: Jobs waiting behind a busy worker are not on the timeout clock.
#[test]
fn test_queued_jobs_do_not_time_out() {
    let store = Arc::new(SlowStore {
        inner: MemoryStore::new(),
        delay_ms: AtomicU64::new(60),
    });
    let backlogged = WorldConfig {
        render_radius: 3,
        worker_threads: 1,
        store_timeout_ms: 1000,
        ..WorldConfig::default()
    };
    let mut manager =
        StreamingManager::new(&backlogged, Arc::clone(&store) as Arc<dyn ChunkStore>).unwrap();

    // 49 lookups at 60 ms each keep the tail of the queue waiting well past the timeout.
    assert!(manager.settle(0.0, 0.0, Duration::from_secs(120)));
    let stats = manager.stats();
    println!("Backlogged: {stats:?}");
    assert_eq!(stats.timed_out, 0);
    assert_eq!(stats.requested, 49);
    assert_eq!(stats.generated, 49);
    assert_eq!(store.chunk_count().unwrap(), 49);
}

/// Test: Leaving the window cancels jobs that have not finished.
#[test]
fn test_leaving_window_cancels_jobs() {
    let store = Arc::new(SlowStore {
        inner: MemoryStore::new(),
        delay_ms: AtomicU64::new(200),
    });
    let mut manager =
        StreamingManager::new(&config(1), Arc::clone(&store) as Arc<dyn ChunkStore>).unwrap();

    manager.tick(0.0, 0.0);
    assert_eq!(manager.pending(), 9);

    manager.tick(16.0 * 100.0, 0.0);
    assert_eq!(manager.stats().cancelled, 9);
    assert_eq!(manager.state(ChunkCoord::new(0, 0)), ChunkState::Unrequested);

    store.delay_ms.store(0, Ordering::SeqCst);
    assert!(manager.settle(16.0 * 100.0, 0.0, Duration::from_secs(120)));
    assert!(manager
        .world()
        .loaded_coords()
        .iter()
        .all(|c| c.chebyshev_distance(ChunkCoord::new(100, 0)) <= 1));
}
