//! Per-node counters and timestamps feeding diagnostics and the tuner.
//!
//! # Design
//!
//! - Hot counters (feeds, splits, steals, ...) are relaxed atomics: one
//!   increment per event, never blocking the work loop.
//! - The worker-concurrency clock and the grain history sit behind small
//!   mutexes. Both are touched only on state-change events (a worker going
//!   idle or waking, the tuner committing a grain change), which are orders
//!   of magnitude rarer than `process` calls.
//! - All counters are monotonically increasing; the tuner works on deltas
//!   between its own snapshots and the end-of-run report walks the final
//!   values.
//!
//! The concurrency clock accumulates wall-clock nanoseconds per "live
//! worker count" level. The accumulated time at maximum concurrency
//! (`live == workers`) is the tuner's utilization signal.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One committed grain change, timestamped relative to node launch.
#[derive(Clone, Copy, Debug)]
pub struct GrainChange {
    /// Time since the logger was created.
    pub at: Duration,
    /// Grain value after the change.
    pub grain: i64,
}

/// Worker-concurrency clock: wall time accumulated per live-worker level.
#[derive(Debug)]
struct ConcurrencyClock {
    live: usize,
    last_change: Instant,
    nanos_at: Vec<u64>,
}

impl ConcurrencyClock {
    fn advance(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_change).as_nanos() as u64;
        self.nanos_at[self.live] = self.nanos_at[self.live].saturating_add(elapsed);
        self.last_change = now;
    }
}

/// Per-node metrics store.
///
/// Safe under concurrent update from workers, the steal manager, and the
/// tuner thread.
#[derive(Debug)]
pub struct PlaceLogger {
    node: usize,
    workers: usize,
    launched: Instant,

    feeds: AtomicU64,
    splits: AtomicU64,
    empties: AtomicU64,
    steal_attempts: AtomicU64,
    steal_successes: AtomicU64,
    lifelines_sent: AtomicU64,
    lifelines_received: AtomicU64,

    clock: Mutex<ConcurrencyClock>,
    grain_history: Mutex<Vec<GrainChange>>,
}

impl PlaceLogger {
    pub fn new(node: usize, workers: usize) -> Self {
        let now = Instant::now();
        Self {
            node,
            workers,
            launched: now,
            feeds: AtomicU64::new(0),
            splits: AtomicU64::new(0),
            empties: AtomicU64::new(0),
            steal_attempts: AtomicU64::new(0),
            steal_successes: AtomicU64::new(0),
            lifelines_sent: AtomicU64::new(0),
            lifelines_received: AtomicU64::new(0),
            clock: Mutex::new(ConcurrencyClock {
                live: 0,
                last_change: now,
                nanos_at: vec![0; workers + 1],
            }),
            grain_history: Mutex::new(Vec::new()),
        }
    }

    // ------------------------------------------------------------------
    // Hot counters
    // ------------------------------------------------------------------

    /// The queue received content (steal success, lifeline delivery, or a
    /// surrendered private fragment).
    #[inline]
    pub fn inc_feeds(&self) {
        self.feeds.fetch_add(1, Ordering::Relaxed);
    }

    /// A `split` produced a fragment.
    #[inline]
    pub fn inc_splits(&self) {
        self.splits.fetch_add(1, Ordering::Relaxed);
    }

    /// The queue was observed empty or unsplittable on access.
    #[inline]
    pub fn inc_empties(&self) {
        self.empties.fetch_add(1, Ordering::Relaxed);
    }

    /// An active-steal request was issued.
    #[inline]
    pub fn inc_steal_attempts(&self) {
        self.steal_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// An active-steal request returned work.
    #[inline]
    pub fn inc_steal_successes(&self) {
        self.steal_successes.fetch_add(1, Ordering::Relaxed);
    }

    /// A lifeline delivery left this node.
    #[inline]
    pub fn inc_lifelines_sent(&self) {
        self.lifelines_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// A lifeline delivery arrived at this node.
    #[inline]
    pub fn inc_lifelines_received(&self) {
        self.lifelines_received.fetch_add(1, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Concurrency clock
    // ------------------------------------------------------------------

    /// Record a change in the number of non-idle workers.
    pub fn set_live(&self, live: usize) {
        debug_assert!(live <= self.workers, "live worker count out of range");
        let mut clock = self.clock.lock().expect("concurrency clock poisoned");
        clock.advance(Instant::now());
        clock.live = live;
    }

    /// Accumulated nanoseconds at maximum worker concurrency, including the
    /// currently open interval.
    pub fn nanos_at_max_concurrency(&self) -> u64 {
        let mut clock = self.clock.lock().expect("concurrency clock poisoned");
        clock.advance(Instant::now());
        clock.nanos_at[self.workers]
    }

    /// Timestamp of the last worker state-change event.
    pub fn last_state_change(&self) -> Instant {
        self.clock
            .lock()
            .expect("concurrency clock poisoned")
            .last_change
    }

    // ------------------------------------------------------------------
    // Grain history
    // ------------------------------------------------------------------

    /// Record a committed grain change for post-hoc analysis.
    pub fn record_grain(&self, grain: i64) {
        let change = GrainChange {
            at: self.launched.elapsed(),
            grain,
        };
        self.grain_history
            .lock()
            .expect("grain history poisoned")
            .push(change);
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn feeds(&self) -> u64 {
        self.feeds.load(Ordering::Relaxed)
    }

    /// Combined split + empty count, the denominator of the tuner's
    /// feed-to-split ratio.
    pub fn splits_and_empties(&self) -> u64 {
        self.splits
            .load(Ordering::Relaxed)
            .saturating_add(self.empties.load(Ordering::Relaxed))
    }

    /// Copy out all counters.
    pub fn snapshot(&self) -> LoggerSnapshot {
        let (nanos_at, live) = {
            let mut clock = self.clock.lock().expect("concurrency clock poisoned");
            clock.advance(Instant::now());
            (clock.nanos_at.clone(), clock.live)
        };
        LoggerSnapshot {
            node: self.node,
            workers: self.workers,
            elapsed: self.launched.elapsed(),
            feeds: self.feeds.load(Ordering::Relaxed),
            splits: self.splits.load(Ordering::Relaxed),
            empties: self.empties.load(Ordering::Relaxed),
            steal_attempts: self.steal_attempts.load(Ordering::Relaxed),
            steal_successes: self.steal_successes.load(Ordering::Relaxed),
            lifelines_sent: self.lifelines_sent.load(Ordering::Relaxed),
            lifelines_received: self.lifelines_received.load(Ordering::Relaxed),
            live,
            nanos_at_level: nanos_at,
            grain_history: self
                .grain_history
                .lock()
                .expect("grain history poisoned")
                .clone(),
        }
    }
}

/// Point-in-time copy of one node's counters.
#[derive(Clone, Debug)]
pub struct LoggerSnapshot {
    pub node: usize,
    pub workers: usize,
    pub elapsed: Duration,
    pub feeds: u64,
    pub splits: u64,
    pub empties: u64,
    pub steal_attempts: u64,
    pub steal_successes: u64,
    pub lifelines_sent: u64,
    pub lifelines_received: u64,
    /// Live worker count at snapshot time.
    pub live: usize,
    /// Wall nanos accumulated per live-worker level, index 0..=workers.
    pub nanos_at_level: Vec<u64>,
    pub grain_history: Vec<GrainChange>,
}

impl LoggerSnapshot {
    /// Fraction of elapsed time spent at maximum worker concurrency.
    pub fn max_concurrency_fraction(&self) -> f64 {
        let total: u64 = self.nanos_at_level.iter().sum();
        if total == 0 {
            return 0.0;
        }
        self.nanos_at_level[self.workers] as f64 / total as f64
    }
}

/// Post-run report: per-node snapshots plus cluster totals.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub nodes: Vec<LoggerSnapshot>,
}

impl RunReport {
    pub fn total_feeds(&self) -> u64 {
        self.nodes.iter().map(|n| n.feeds).sum()
    }

    pub fn total_steal_attempts(&self) -> u64 {
        self.nodes.iter().map(|n| n.steal_attempts).sum()
    }

    pub fn total_steal_successes(&self) -> u64 {
        self.nodes.iter().map(|n| n.steal_successes).sum()
    }

    pub fn total_lifeline_deliveries(&self) -> u64 {
        self.nodes.iter().map(|n| n.lifelines_sent).sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "node  feeds  splits  empties  steals(ok/try)  lifelines(out/in)  max-conc%  grain-changes"
        )?;
        for n in &self.nodes {
            writeln!(
                f,
                "{:>4}  {:>5}  {:>6}  {:>7}  {:>7}/{:<6}  {:>8}/{:<8}  {:>8.1}  {:>13}",
                n.node,
                n.feeds,
                n.splits,
                n.empties,
                n.steal_successes,
                n.steal_attempts,
                n.lifelines_sent,
                n.lifelines_received,
                n.max_concurrency_fraction() * 100.0,
                n.grain_history.len(),
            )?;
        }
        writeln!(
            f,
            "total feeds={} steals={}/{} lifelines={}",
            self.total_feeds(),
            self.total_steal_successes(),
            self.total_steal_attempts(),
            self.total_lifeline_deliveries(),
        )
    }
}
