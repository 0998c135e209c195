//! # STRATA Server
//!
//! Headless world host: streams chunks around an observer walking a fixed
//! square, persisting everything it generates. With `listen_addr` set it
//! also answers chunk requests over TCP, and keeps doing so after the walk.
//!
//! ```bash
//! # Default configuration, in-memory store
//! ./strata_server
//!
//! # With a config file (set store_path to persist)
//! RUST_LOG=strata_world=debug ./strata_server strata.toml
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use strata::procedural::WorldSeed;
use strata::world::{ChunkLoader, Observer, StreamingService, WorldConfig};
use strata::{open_store, ChunkEndpoint, ChunkSource, ScriptedWalk};
use tracing_subscriber::EnvFilter;

/// Observer update period.
const STEP: Duration = Duration::from_millis(100);

/// Side of the walked square, in blocks.
const WALK_SIDE: f64 = 400.0;

/// Period of the status line.
const REPORT_EVERY: Duration = Duration::from_secs(5);

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => match WorldConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        },
        None => WorldConfig::default(),
    };
    // Streaming and the endpoint must generate from the same seed.
    config.seed = WorldSeed::new(config.seed).resolve().value();
    tracing::info!("World seed {}", config.seed);

    let store = match open_store(&config) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Cannot open chunk store: {}", e);
            std::process::exit(1);
        }
    };

    let mut walk = ScriptedWalk::square(WALK_SIDE, strata::walk::DEFAULT_SPEED);
    let [x, y, z] = walk.position();
    let observer = Arc::new(Observer::new(x, y, z));

    let mut service = match StreamingService::start(&config, Arc::clone(&store), Arc::clone(&observer)) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!("Cannot start streaming: {}", e);
            std::process::exit(1);
        }
    };

    let endpoint = config.listen_addr.map(|addr| {
        let loader = ChunkLoader::new(Arc::clone(&store), Arc::new(config.terrain_generator()));
        let source = ChunkSource::new(Arc::clone(service.world()), loader);
        match ChunkEndpoint::bind(addr, source) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::error!("Cannot listen on {}: {}", addr, e);
                std::process::exit(1);
            }
        }
    });

    let started = Instant::now();
    let mut last_report = Instant::now();
    while !walk.is_finished() {
        std::thread::sleep(STEP);
        let [x, y, z] = walk.step(service.world(), STEP.as_secs_f64());
        observer.set_position(x, y, z);

        if last_report.elapsed() >= REPORT_EVERY {
            last_report = Instant::now();
            let world = service.world();
            let stats = service.stats();
            tracing::info!(
                "Observer at ({:.1}, {:.1}, {:.1}): {} chunks, {} instances, {} nearby voxels, {} generated, {} loaded, {} failed",
                x,
                y,
                z,
                world.len(),
                world.instance_count(),
                world.find_nearest_voxels(x, y - 1.0, z).len(),
                stats.generated,
                stats.loaded,
                stats.failed
            );
        }
    }

    service.stop();
    let stats = service.stats();
    let ticks = service.tick_stats();
    tracing::info!(
        "Walk finished in {:?}: {} requested, {} generated, {} loaded, {} repaired, {} evicted, {} timed out",
        started.elapsed(),
        stats.requested,
        stats.generated,
        stats.loaded,
        stats.repaired,
        stats.evicted,
        stats.timed_out
    );
    tracing::info!(
        "Tick time: min {}us, avg {}us, max {}us, {} late of {}",
        ticks.min_tick_us,
        ticks.avg_tick_us,
        ticks.max_tick_us,
        ticks.late_ticks,
        ticks.total_ticks
    );

    // The world stays frozen at the walk's end; requests keep being served.
    if let Some(endpoint) = endpoint {
        loop {
            std::thread::sleep(REPORT_EVERY);
            let stats = endpoint.stats();
            tracing::info!(
                "Endpoint {}: {} connections, {} resident, {} resolved, {} failed",
                endpoint.local_addr(),
                stats.connections,
                stats.resident,
                stats.resolved,
                stats.failed
            );
        }
    }
}
