//! # Streaming Manager
//!
//! Keeps the loaded world matched to a moving observer.
//!
//! ## Chunk lifecycle
//!
//! ```text
//!   Unrequested ──enters window──> Requested ──worker──> Loading | Generating ──> Loaded
//!                                     ^                         │                   │
//!                                     └──failure / timeout──────┘      leaves R+1 ──┴──> Evicted
//! ```
//!
//! Each [`StreamingManager::tick`]:
//! 1. applies finished jobs (results of superseded jobs are dropped)
//! 2. cancels and re-queues jobs older than the store timeout
//! 3. evicts loaded chunks and cancels jobs beyond `render_radius + 1`
//! 4. requests missing chunks within `render_radius`, nearest first
//! 5. hands queued requests to the worker pool until its queue is full
//!
//! Failures never leave this module: a failed coordinate is simply
//! requested again on the next tick.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use strata_procedural::ChunkCoord;
use strata_store::ChunkStore;

use crate::config::WorldConfig;
use crate::error::{LoadError, StreamError, StreamResult};
use crate::loader::{CancelToken, ChunkLoader, JobPhase, LoadOrigin};
use crate::pool::{ChunkJob, JobResult, WorkerPool};
use crate::world::World;

/// Evicted coordinates remembered for [`StreamingManager::state`].
const EVICTED_HISTORY: usize = 4096;

/// Longest wait on the result queue inside [`StreamingManager::settle`].
const SETTLE_POLL: Duration = Duration::from_millis(50);

/// Where a chunk coordinate is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChunkState {
    /// Never requested, or forgotten.
    Unrequested,
    /// Wanted, waiting for a worker or a store answer.
    Requested,
    /// A worker is generating it.
    Generating,
    /// A worker is reading it from the store.
    Loading,
    /// In the world and renderable.
    Loaded,
    /// Was loaded, then left the retention bound.
    Evicted,
}

/// Running counters for the streaming manager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Ticks run.
    pub ticks: u64,
    /// Coordinates that entered the window and were requested.
    pub requested: u64,
    /// Chunks generated and persisted for the first time.
    pub generated: u64,
    /// Chunks read back from the store.
    pub loaded: u64,
    /// Chunks whose voxel set was missing and was regenerated.
    pub repaired: u64,
    /// Chunks evicted from memory.
    pub evicted: u64,
    /// Job attempts that failed with a store or data error.
    pub failed: u64,
    /// Job attempts cancelled for exceeding the store timeout.
    pub timed_out: u64,
    /// Jobs cancelled because their coordinate left the window.
    pub cancelled: u64,
}

/// A coordinate that has been requested but is not loaded yet.
#[derive(Debug)]
struct Request {
    generation: u64,
    token: CancelToken,
    dispatched: bool,
}

/// Drives chunk loading and eviction around an observer.
pub struct StreamingManager {
    world: Arc<World>,
    pool: WorkerPool,
    render_radius: u32,
    retention_radius: u32,
    job_timeout: Duration,
    /// Window offsets, nearest first.
    window: Vec<(i32, i32)>,
    requests: HashMap<ChunkCoord, Request>,
    evicted: HashSet<ChunkCoord>,
    evicted_order: VecDeque<ChunkCoord>,
    next_generation: u64,
    center: Option<ChunkCoord>,
    stats: StreamStats,
}

impl StreamingManager {
    /// Validates `config` and starts a worker pool over `store`.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an invalid configuration and `Spawn` if worker
    /// threads cannot be started.
    pub fn new(config: &WorldConfig, store: Arc<dyn ChunkStore>) -> StreamResult<Self> {
        Self::with_world(config, store, Arc::new(World::new()))
    }

    /// Like [`Self::new`], publishing into an existing world.
    ///
    /// # Errors
    ///
    /// As [`Self::new`].
    pub fn with_world(
        config: &WorldConfig,
        store: Arc<dyn ChunkStore>,
        world: Arc<World>,
    ) -> StreamResult<Self> {
        config.validate()?;

        let terrain = config.terrain_generator();
        tracing::info!(
            "Streaming world seed {} (radius {}, {} octaves)",
            terrain.noise().effective_seed().value(),
            config.render_radius,
            terrain.noise().octave_count()
        );

        let window = window_offsets(config.render_radius);
        let loader = Arc::new(ChunkLoader::new(store, Arc::new(terrain)));
        let pool = WorkerPool::new(loader, config.resolved_worker_threads(), window.len())
            .map_err(|e| StreamError::spawn("chunk worker", &e))?;

        Ok(Self {
            world,
            pool,
            render_radius: config.render_radius,
            retention_radius: config.retention_radius(),
            job_timeout: config.store_timeout(),
            window,
            requests: HashMap::new(),
            evicted: HashSet::new(),
            evicted_order: VecDeque::new(),
            next_generation: 0,
            center: None,
            stats: StreamStats::default(),
        })
    }

    /// Runs one streaming step for an observer at world position `(x, z)`.
    pub fn tick(&mut self, x: f64, z: f64) {
        let center = ChunkCoord::from_world_pos(x, z);
        self.center = Some(center);
        self.stats.ticks += 1;

        while let Some(result) = self.pool.try_recv() {
            self.apply_result(result);
        }
        self.expire_jobs();
        self.evict_outside(center);
        self.request_window(center);
        self.dispatch(center);

        tracing::debug!(
            "Tick {} at {}: {} loaded, {} pending, {} queued",
            self.stats.ticks,
            center,
            self.world.len(),
            self.requests.len(),
            self.pool.queued()
        );
    }

    /// Ticks repeatedly until every chunk in the window around `(x, z)` is
    /// loaded or `timeout` passes. Returns true if the window filled.
    pub fn settle(&mut self, x: f64, z: f64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.tick(x, z);
            if self.is_window_loaded() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if let Some(result) = self.pool.recv_timeout((deadline - now).min(SETTLE_POLL)) {
                self.apply_result(result);
            }
        }
    }

    /// Returns true if every coordinate within the render radius of the last
    /// tick's center is loaded.
    #[must_use]
    pub fn is_window_loaded(&self) -> bool {
        let Some(center) = self.center else {
            return false;
        };
        self.window
            .iter()
            .all(|&(dx, dz)| self.world.contains(center.offset(dx, dz)))
    }

    /// Lifecycle state of a coordinate.
    #[must_use]
    pub fn state(&self, coord: ChunkCoord) -> ChunkState {
        if self.world.contains(coord) {
            return ChunkState::Loaded;
        }
        if let Some(request) = self.requests.get(&coord) {
            if !request.dispatched {
                return ChunkState::Requested;
            }
            return match request.token.phase() {
                JobPhase::Queued | JobPhase::Checking => ChunkState::Requested,
                JobPhase::Loading => ChunkState::Loading,
                JobPhase::Generating => ChunkState::Generating,
            };
        }
        if self.evicted.contains(&coord) {
            return ChunkState::Evicted;
        }
        ChunkState::Unrequested
    }

    /// The world chunks are published into.
    #[must_use]
    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    /// Counters since creation.
    #[must_use]
    pub const fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Center chunk of the last tick.
    #[must_use]
    pub const fn center(&self) -> Option<ChunkCoord> {
        self.center
    }

    /// Requested coordinates that are not loaded yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.requests.len()
    }

    /// Request radius in chunks.
    #[must_use]
    pub const fn render_radius(&self) -> u32 {
        self.render_radius
    }

    /// Eviction bound in chunks.
    #[must_use]
    pub const fn retention_radius(&self) -> u32 {
        self.retention_radius
    }

    fn apply_result(&mut self, result: JobResult) {
        let current = self
            .requests
            .get(&result.coord)
            .is_some_and(|r| r.generation == result.generation && r.dispatched);
        if !current {
            tracing::debug!(
                "Dropping superseded result for {} (job {})",
                result.coord,
                result.generation
            );
            return;
        }
        self.requests.remove(&result.coord);

        match result.result {
            Ok(outcome) => {
                let coord = outcome.chunk.coord();
                let chunk_id = outcome.chunk_id;
                if !self.world.publish(chunk_id, outcome.chunk) {
                    tracing::debug!("Chunk {} already loaded", coord);
                    return;
                }
                self.forget_evicted(coord);

                let verb = match outcome.origin {
                    LoadOrigin::Generated => {
                        self.stats.generated += 1;
                        "Generated"
                    }
                    LoadOrigin::Loaded => {
                        self.stats.loaded += 1;
                        "Loaded"
                    }
                    LoadOrigin::Repaired => {
                        self.stats.repaired += 1;
                        "Repaired"
                    }
                };
                tracing::info!(
                    "{} chunk {} as {} in {:?}",
                    verb,
                    coord,
                    chunk_id,
                    result.elapsed
                );
            }
            Err(LoadError::Cancelled) => {
                // Cancelled jobs are normally already superseded; if not, try again.
                self.enqueue(result.coord);
            }
            Err(e) => {
                self.stats.failed += 1;
                tracing::warn!("Chunk {} failed, retrying next tick: {}", result.coord, e);
                self.enqueue(result.coord);
            }
        }
    }

    /// Cancels jobs a worker has been running for longer than the store timeout.
    ///
    /// Jobs still waiting in the queue are not on the clock.
    fn expire_jobs(&mut self) {
        let timeout = self.job_timeout;
        let expired: Vec<ChunkCoord> = self
            .requests
            .iter()
            .filter(|(_, r)| {
                r.dispatched && r.token.started().is_some_and(|at| at.elapsed() > timeout)
            })
            .map(|(coord, _)| *coord)
            .collect();

        for coord in expired {
            if let Some(request) = self.requests.get(&coord) {
                request.token.cancel();
            }
            self.stats.timed_out += 1;
            tracing::warn!("Chunk {} timed out after {:?}, retrying", coord, timeout);
            self.enqueue(coord);
        }
    }

    fn evict_outside(&mut self, center: ChunkCoord) {
        let bound = self.retention_radius;

        let evicted = self.world.retain_within(center, bound);
        if !evicted.is_empty() {
            self.stats.evicted += evicted.len() as u64;
            tracing::debug!("Evicted {} chunks around {}", evicted.len(), center);
            for coord in evicted {
                self.remember_evicted(coord);
            }
        }

        let before = self.requests.len();
        self.requests.retain(|coord, request| {
            let keep = coord.chebyshev_distance(center) <= bound;
            if !keep {
                request.token.cancel();
            }
            keep
        });
        self.stats.cancelled += (before - self.requests.len()) as u64;
    }

    fn request_window(&mut self, center: ChunkCoord) {
        for i in 0..self.window.len() {
            let (dx, dz) = self.window[i];
            let coord = center.offset(dx, dz);
            if self.requests.contains_key(&coord) || self.world.contains(coord) {
                continue;
            }
            self.stats.requested += 1;
            self.enqueue(coord);
        }
    }

    /// Replaces any request for `coord` with a fresh, undispatched one.
    fn enqueue(&mut self, coord: ChunkCoord) {
        self.next_generation += 1;
        self.requests.insert(
            coord,
            Request {
                generation: self.next_generation,
                token: CancelToken::new(),
                dispatched: false,
            },
        );
    }

    fn dispatch(&mut self, center: ChunkCoord) {
        let mut waiting: Vec<ChunkCoord> = self
            .requests
            .iter()
            .filter(|(_, r)| !r.dispatched)
            .map(|(coord, _)| *coord)
            .collect();
        waiting.sort_unstable_by_key(|coord| (coord.chebyshev_distance(center), *coord));

        for coord in waiting {
            let Some(request) = self.requests.get_mut(&coord) else {
                continue;
            };
            let job = ChunkJob {
                coord,
                generation: request.generation,
                token: request.token.clone(),
            };
            if self.pool.try_submit(job).is_err() {
                break;
            }
            request.dispatched = true;
        }
    }

    fn remember_evicted(&mut self, coord: ChunkCoord) {
        if self.evicted.insert(coord) {
            self.evicted_order.push_back(coord);
        }
        while self.evicted_order.len() > EVICTED_HISTORY {
            if let Some(oldest) = self.evicted_order.pop_front() {
                self.evicted.remove(&oldest);
            }
        }
    }

    fn forget_evicted(&mut self, coord: ChunkCoord) {
        if self.evicted.remove(&coord) {
            self.evicted_order.retain(|c| *c != coord);
        }
    }
}

/// Offsets of the `[-r, r]²` window, nearest ring first.
fn window_offsets(radius: u32) -> Vec<(i32, i32)> {
    let r = i32::try_from(radius).unwrap_or(i32::MAX / 2);
    let mut offsets: Vec<(i32, i32)> = (-r..=r)
        .flat_map(|dx| (-r..=r).map(move |dz| (dx, dz)))
        .collect();
    offsets.sort_by_key(|&(dx, dz)| (dx.unsigned_abs().max(dz.unsigned_abs()), dz, dx));
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_store::MemoryStore;

    fn config(radius: u32) -> WorldConfig {
        WorldConfig {
            render_radius: radius,
            worker_threads: 2,
            ..WorldConfig::default()
        }
    }

    #[test]
    fn test_window_offsets_nearest_first() {
        let offsets = window_offsets(2);
        assert_eq!(offsets.len(), 25);
        assert_eq!(offsets[0], (0, 0));

        let rings: Vec<u32> = offsets
            .iter()
            .map(|&(dx, dz)| dx.unsigned_abs().max(dz.unsigned_abs()))
            .collect();
        assert!(rings.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(rings.iter().filter(|&&r| r == 1).count(), 8);
    }

    #[test]
    fn test_settle_fills_window() {
        let store = Arc::new(MemoryStore::new());
        let mut manager = StreamingManager::new(&config(1), Arc::clone(&store) as Arc<dyn ChunkStore>).unwrap();

        assert!(manager.settle(8.0, 8.0, Duration::from_secs(60)));
        assert_eq!(manager.world().len(), 9);
        assert_eq!(store.chunk_count().unwrap(), 9);

        let stats = manager.stats();
        println!("Stats after settle: {stats:?}");
        assert_eq!(stats.generated, 9);
        assert_eq!(stats.requested, 9);
        assert_eq!(manager.state(ChunkCoord::new(1, -1)), ChunkState::Loaded);
        assert_eq!(manager.state(ChunkCoord::new(5, 5)), ChunkState::Unrequested);
    }

    #[test]
    fn test_first_tick_requests_window() {
        let store = Arc::new(MemoryStore::new());
        let mut manager = StreamingManager::new(&config(2), store).unwrap();

        manager.tick(0.0, 0.0);
        assert_eq!(manager.stats().requested, 25);
        assert_eq!(manager.center(), Some(ChunkCoord::new(0, 0)));
        assert_ne!(manager.state(ChunkCoord::new(2, 2)), ChunkState::Unrequested);
    }

    #[test]
    fn test_moving_away_evicts() {
        let store = Arc::new(MemoryStore::new());
        let mut manager = StreamingManager::new(&config(1), store).unwrap();
        assert!(manager.settle(0.0, 0.0, Duration::from_secs(60)));

        // Ten chunks east: the original window is beyond radius + 1.
        assert!(manager.settle(160.0, 0.0, Duration::from_secs(60)));
        assert_eq!(manager.state(ChunkCoord::new(0, 0)), ChunkState::Evicted);
        assert_eq!(manager.stats().evicted, 9);
        assert!(manager
            .world()
            .loaded_coords()
            .iter()
            .all(|c| c.chebyshev_distance(ChunkCoord::new(10, 0)) <= 2));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let store = Arc::new(MemoryStore::new());
        let result = StreamingManager::new(&config(0), store);
        assert!(matches!(result, Err(StreamError::Config(_))));
    }
}
