//! # Streaming Tick Clock
//!
//! Fixed-period clock for the streaming window recompute.
//!
//! Unlike a simulation loop, a late streaming tick is never caught up: if a
//! tick overruns, the next one is scheduled a full period after it instead
//! of firing back to back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Longest single sleep while waiting, so shutdown is noticed promptly.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Tick timing statistics.
#[derive(Clone, Copy, Debug)]
pub struct TickStats {
    /// Minimum tick duration observed.
    pub min_tick_us: u64,
    /// Maximum tick duration observed.
    pub max_tick_us: u64,
    /// Average tick duration (rolling).
    pub avg_tick_us: u64,
    /// Number of ticks that took longer than the period.
    pub late_ticks: u64,
    /// Total ticks measured.
    pub total_ticks: u64,
}

impl Default for TickStats {
    fn default() -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: 0,
            late_ticks: 0,
            total_ticks: 0,
        }
    }
}

/// Fixed-period tick controller.
pub struct TickClock {
    period: Duration,
    next_due: Instant,
    tick_count: u64,
    stats: TickStats,
}

impl TickClock {
    /// Creates a clock whose first tick is due immediately.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            next_due: Instant::now(),
            tick_count: 0,
            stats: TickStats::default(),
        }
    }

    /// Returns true if a tick is due.
    #[must_use]
    pub fn should_tick(&self) -> bool {
        Instant::now() >= self.next_due
    }

    /// Marks the start of a tick and schedules the next one.
    ///
    /// Returns the tick start time for duration measurement.
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        let now = Instant::now();
        self.next_due += self.period;
        if self.next_due <= now {
            self.next_due = now + self.period;
        }
        self.tick_count += 1;
        now
    }

    /// Marks the end of a tick and records its duration.
    pub fn end_tick(&mut self, start: Instant) {
        let duration = start.elapsed();
        let duration_us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);

        let stats = &mut self.stats;
        stats.min_tick_us = stats.min_tick_us.min(duration_us);
        stats.max_tick_us = stats.max_tick_us.max(duration_us);
        stats.avg_tick_us = if stats.total_ticks == 0 {
            duration_us
        } else {
            (stats.avg_tick_us.saturating_mul(15).saturating_add(duration_us)) / 16
        };
        stats.total_ticks += 1;

        if duration > self.period {
            stats.late_ticks += 1;
        }
    }

    /// Sleeps until the next tick is due or `shutdown` is raised.
    ///
    /// Returns false if it stopped because of shutdown.
    pub fn wait_for_next_tick(&self, shutdown: &AtomicBool) -> bool {
        loop {
            if shutdown.load(Ordering::Acquire) {
                return false;
            }
            let remaining = self.time_until_next_tick();
            if remaining.is_zero() {
                return true;
            }
            std::thread::sleep(remaining.min(WAIT_SLICE));
        }
    }

    /// Time left before the next tick is due.
    #[must_use]
    pub fn time_until_next_tick(&self) -> Duration {
        self.next_due.saturating_duration_since(Instant::now())
    }

    /// Ticks started so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Tick statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Tick period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }
}
