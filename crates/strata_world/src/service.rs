//! # Streaming Service
//!
//! Runs a [`StreamingManager`] on its own thread, ticking it at the
//! configured interval against a shared [`Observer`] position.
//!
//! The movement side writes the observer; the render side reads
//! [`StreamingService::world`]. Neither ever waits on chunk loading.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use strata_store::ChunkStore;

use crate::config::WorldConfig;
use crate::error::{StreamError, StreamResult};
use crate::streaming::{StreamStats, StreamingManager};
use crate::ticker::{TickClock, TickStats};
use crate::world::World;

/// Observer position shared between threads.
///
/// Each axis is stored separately; a reader may see a position mixed from
/// two consecutive writes, which is harmless at streaming granularity.
#[derive(Debug, Default)]
pub struct Observer {
    x: AtomicU64,
    y: AtomicU64,
    z: AtomicU64,
}

impl Observer {
    /// Creates an observer at `(x, y, z)`.
    #[must_use]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: AtomicU64::new(x.to_bits()),
            y: AtomicU64::new(y.to_bits()),
            z: AtomicU64::new(z.to_bits()),
        }
    }

    /// Moves the observer.
    pub fn set_position(&self, x: f64, y: f64, z: f64) {
        self.x.store(x.to_bits(), Ordering::Relaxed);
        self.y.store(y.to_bits(), Ordering::Relaxed);
        self.z.store(z.to_bits(), Ordering::Relaxed);
    }

    /// Current position.
    #[must_use]
    pub fn position(&self) -> (f64, f64, f64) {
        (
            f64::from_bits(self.x.load(Ordering::Relaxed)),
            f64::from_bits(self.y.load(Ordering::Relaxed)),
            f64::from_bits(self.z.load(Ordering::Relaxed)),
        )
    }
}

#[derive(Default)]
struct Shared {
    stats: Mutex<StreamStats>,
    tick_stats: Mutex<TickStats>,
}

/// Background streaming thread.
pub struct StreamingService {
    world: Arc<World>,
    observer: Arc<Observer>,
    shared: Arc<Shared>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StreamingService {
    /// Starts streaming around `observer`.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an invalid configuration and `Spawn` if a thread
    /// cannot be started.
    pub fn start(
        config: &WorldConfig,
        store: Arc<dyn ChunkStore>,
        observer: Arc<Observer>,
    ) -> StreamResult<Self> {
        let mut manager = StreamingManager::new(config, store)?;
        let world = Arc::clone(manager.world());
        let shared = Arc::new(Shared::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let observer = Arc::clone(&observer);
            let shared = Arc::clone(&shared);
            let shutdown = Arc::clone(&shutdown);
            let mut clock = TickClock::new(config.tick_interval());

            thread::Builder::new()
                .name("strata-streaming".to_string())
                .spawn(move || {
                    tracing::info!("Streaming service started, tick every {:?}", clock.period());
                    while clock.wait_for_next_tick(&shutdown) {
                        let start = clock.begin_tick();
                        let (x, _, z) = observer.position();
                        manager.tick(x, z);
                        clock.end_tick(start);

                        *shared.stats.lock() = manager.stats();
                        *shared.tick_stats.lock() = *clock.stats();
                    }
                    let stats = manager.stats();
                    tracing::info!(
                        "Streaming service stopped after {} ticks: {} generated, {} loaded, {} evicted, {} failed",
                        stats.ticks,
                        stats.generated,
                        stats.loaded,
                        stats.evicted,
                        stats.failed
                    );
                })
                .map_err(|e| StreamError::spawn("streaming", &e))?
        };

        Ok(Self {
            world,
            observer,
            shared,
            shutdown,
            handle: Some(handle),
        })
    }

    /// The loaded world, for rendering and queries.
    #[must_use]
    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    /// The observer being followed.
    #[must_use]
    pub fn observer(&self) -> &Arc<Observer> {
        &self.observer
    }

    /// Streaming counters as of the last tick.
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        *self.shared.stats.lock()
    }

    /// Tick timing as of the last tick.
    #[must_use]
    pub fn tick_stats(&self) -> TickStats {
        *self.shared.tick_stats.lock()
    }

    /// Returns true until [`Self::stop`] is called.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Acquire)
    }

    /// Stops the streaming thread and its workers, waiting for both.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StreamingService {
    fn drop(&mut self) {
        self.stop();
    }
}
