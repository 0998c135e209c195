//! # Chunk Worker Pool
//!
//! A fixed set of OS threads resolving chunk jobs.
//!
//! ## Architecture
//!
//! ```text
//!   StreamingManager ──> [bounded job queue] ──> Worker 1..N ──> [result queue] ──> StreamingManager
//!                          (try_send only)       (ChunkLoader)      (unbounded)
//! ```
//!
//! The manager never blocks on a full queue: a rejected job stays
//! requested and is offered again next tick. Dropping the pool closes the
//! job queue and joins every worker.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use strata_procedural::ChunkCoord;

use crate::error::{LoadError, LoadResult};
use crate::loader::{CancelToken, ChunkLoader, LoadOutcome};

/// One unit of work: resolve a coordinate.
#[derive(Clone, Debug)]
pub struct ChunkJob {
    /// Coordinate to resolve.
    pub coord: ChunkCoord,
    /// Request number, used to discard results of superseded jobs.
    pub generation: u64,
    /// Cancellation flag shared with the manager.
    pub token: CancelToken,
}

/// The answer to a [`ChunkJob`].
#[derive(Debug)]
pub struct JobResult {
    /// Coordinate that was resolved.
    pub coord: ChunkCoord,
    /// Request number copied from the job.
    pub generation: u64,
    /// Loaded chunk or the reason there is none.
    pub result: LoadResult<LoadOutcome>,
    /// Wall time the worker spent on the job.
    pub elapsed: Duration,
}

/// Fixed-size pool of chunk workers.
pub struct WorkerPool {
    jobs: Option<Sender<ChunkJob>>,
    results: Receiver<JobResult>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `threads` workers (at least one) sharing `loader`.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to spawn a thread.
    pub fn new(loader: Arc<ChunkLoader>, threads: usize, queue_capacity: usize) -> std::io::Result<Self> {
        let (job_tx, job_rx) = bounded::<ChunkJob>(queue_capacity.max(1));
        let (result_tx, result_rx) = unbounded::<JobResult>();

        let mut workers = Vec::with_capacity(threads.max(1));
        for index in 0..threads.max(1) {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let loader = Arc::clone(&loader);

            let handle = thread::Builder::new()
                .name(format!("strata-chunk-{index}"))
                .spawn(move || Self::worker_loop(&loader, &jobs, &results))?;
            workers.push(handle);
        }

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            workers,
        })
    }

    /// Worker thread main loop. Exits when the job queue closes.
    fn worker_loop(loader: &ChunkLoader, jobs: &Receiver<ChunkJob>, results: &Sender<JobResult>) {
        for job in jobs {
            job.token.mark_started();
            let start = Instant::now();
            let result = if job.token.is_cancelled() {
                Err(LoadError::Cancelled)
            } else {
                loader.resolve(job.coord, &job.token)
            };

            let sent = results.send(JobResult {
                coord: job.coord,
                generation: job.generation,
                result,
                elapsed: start.elapsed(),
            });
            if sent.is_err() {
                // Pool is being dropped.
                break;
            }
        }
    }

    /// Offers a job to the queue without blocking.
    ///
    /// # Errors
    ///
    /// Hands the job back if the queue is full or the pool is shutting down.
    pub fn try_submit(&self, job: ChunkJob) -> Result<(), ChunkJob> {
        let Some(jobs) = &self.jobs else {
            return Err(job);
        };
        jobs.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) | TrySendError::Disconnected(job) => job,
        })
    }

    /// Takes one finished result, if any.
    #[must_use]
    pub fn try_recv(&self) -> Option<JobResult> {
        self.results.try_recv().ok()
    }

    /// Waits up to `timeout` for one finished result.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<JobResult> {
        match self.results.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Jobs waiting for a worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.jobs.as_ref().map_or(0, Sender::len)
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the queue ends each worker's loop after its current job.
        self.jobs.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::LoadOrigin;
    use strata_procedural::{NoiseField, TerrainGenerator, WorldSeed};
    use strata_store::MemoryStore;

    fn pool(threads: usize, capacity: usize) -> WorkerPool {
        let terrain = TerrainGenerator::new(NoiseField::new(WorldSeed::new(200), 255.0, 0.5));
        let loader = ChunkLoader::new(Arc::new(MemoryStore::new()), Arc::new(terrain));
        WorkerPool::new(Arc::new(loader), threads, capacity).unwrap()
    }

    fn job(x: i32, generation: u64) -> ChunkJob {
        ChunkJob {
            coord: ChunkCoord::new(x, 0),
            generation,
            token: CancelToken::new(),
        }
    }

    #[test]
    fn test_jobs_are_resolved() {
        let pool = pool(4, 64);
        assert_eq!(pool.worker_count(), 4);

        for x in 0..16 {
            pool.try_submit(job(x, x as u64)).unwrap();
        }

        let mut seen = Vec::new();
        while seen.len() < 16 {
            let result = pool
                .recv_timeout(Duration::from_secs(30))
                .expect("worker result");
            let outcome = result.result.unwrap();
            assert_eq!(outcome.origin, LoadOrigin::Generated);
            assert_eq!(outcome.chunk.coord(), result.coord);
            seen.push(result.generation);
        }

        seen.sort_unstable();
        assert_eq!(seen, (0..16).collect::<Vec<u64>>());
    }

    #[test]
    fn test_cancelled_job_reports_cancelled() {
        let pool = pool(1, 4);
        let cancelled = job(0, 1);
        cancelled.token.cancel();
        pool.try_submit(cancelled).unwrap();

        let result = pool.recv_timeout(Duration::from_secs(30)).expect("worker result");
        assert_eq!(result.result.unwrap_err(), LoadError::Cancelled);
    }

    #[test]
    fn test_full_queue_hands_job_back() {
        let pool = pool(1, 1);
        let mut rejected = 0;
        for x in 0..64 {
            if pool.try_submit(job(x, 0)).is_err() {
                rejected += 1;
            }
        }
        println!("Rejected {rejected} of 64 jobs");
        assert!(rejected > 0, "A one-slot queue must push back");
    }

    #[test]
    fn test_drop_joins_workers() {
        let pool = pool(3, 8);
        for x in 0..8 {
            let _ = pool.try_submit(job(x, 0));
        }
        drop(pool);
    }
}
