//! Run configuration.
//!
//! One `Configuration` instance exists per node. Everything is fixed at
//! bootstrap except `grain`, which the local tuner thread mutates and
//! workers read without locking. Reads only need to observe a *recent*
//! value, not an instantaneous one, so `grain` is a relaxed atomic:
//! eventual consistency is the contract, sequential consistency is not.
//!
//! `validate()` turns bad parameters into [`SchedulerError::Setup`] before
//! any thread is spawned. A lifeline graph that is disconnected for the
//! configured node count is a configuration error of the same kind.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::SchedulerError;
use crate::lifeline::{HypercubeStrategy, LifelineStrategy};

/// Default work units per `process` call.
pub const DEFAULT_GRAIN: i64 = 4096;
/// Default active-steal attempts per round.
pub const DEFAULT_STEAL_ATTEMPTS: usize = 4;
/// Default tuning interval.
pub const DEFAULT_TUNING_INTERVAL: Duration = Duration::from_millis(20);

/// Tunable run parameters for one node.
#[derive(Debug)]
pub struct Configuration {
    /// Number of nodes in the cluster.
    pub nodes: usize,
    /// Worker threads per node (`x`).
    pub workers: usize,
    /// Active-steal attempts per round before falling back to lifelines.
    pub steal_attempts: usize,
    /// Baseline grain (`workUnit`): the immutable bootstrap value that
    /// seeds `grain` and the tuner's reference point.
    pub work_unit: i64,
    /// Interval between tuner invocations (`t`).
    pub tuning_interval: Duration,
    /// Seed for deterministic victim selection; node id is mixed in so
    /// managers do not share a stream.
    pub seed: u64,
    /// Passive-steal graph.
    pub strategy: Arc<dyn LifelineStrategy>,

    /// Current grain (`n`): work units per `process` call. Mutated only by
    /// the local tuner, read relaxed everywhere else. Always > 0.
    grain: AtomicI64,
}

impl Configuration {
    /// Configuration with conservative defaults for the given cluster shape.
    pub fn new(nodes: usize, workers: usize) -> Self {
        Self {
            nodes,
            workers,
            steal_attempts: DEFAULT_STEAL_ATTEMPTS,
            work_unit: DEFAULT_GRAIN,
            tuning_interval: DEFAULT_TUNING_INTERVAL,
            seed: 0x853c_49e6_748f_ea9b,
            strategy: Arc::new(HypercubeStrategy),
            grain: AtomicI64::new(DEFAULT_GRAIN),
        }
    }

    /// Set the initial grain and baseline work unit together.
    pub fn with_work_unit(mut self, work_unit: i64) -> Self {
        self.work_unit = work_unit;
        self.grain = AtomicI64::new(work_unit);
        self
    }

    /// Set the per-round steal attempt budget.
    pub fn with_steal_attempts(mut self, attempts: usize) -> Self {
        self.steal_attempts = attempts;
        self
    }

    /// Set the tuner firing interval.
    pub fn with_tuning_interval(mut self, interval: Duration) -> Self {
        self.tuning_interval = interval;
        self
    }

    /// Set the victim-selection seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Replace the lifeline strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn LifelineStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Current grain value.
    #[inline]
    pub fn grain(&self) -> i64 {
        self.grain.load(Ordering::Relaxed)
    }

    /// Current grain as a `process` work amount.
    #[inline]
    pub fn grain_amount(&self) -> usize {
        self.grain().max(1) as usize
    }

    /// Store a new grain value, clamped to stay positive. Tuner-only.
    #[inline]
    pub fn set_grain(&self, grain: i64) {
        self.grain.store(grain.max(1), Ordering::Relaxed);
    }

    /// Check bootstrap-time invariants.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.nodes == 0 {
            return Err(SchedulerError::Setup("node count must be > 0".into()));
        }
        if self.workers == 0 {
            return Err(SchedulerError::Setup("worker count must be > 0".into()));
        }
        if self.grain() <= 0 || self.work_unit <= 0 {
            return Err(SchedulerError::Setup("grain must be > 0".into()));
        }
        if self.tuning_interval.is_zero() {
            return Err(SchedulerError::Setup("tuning interval must be > 0".into()));
        }
        for node in 0..self.nodes {
            if self.strategy.lifeline(node, self.nodes).contains(&node) {
                return Err(SchedulerError::Setup(format!(
                    "lifeline strategy yields a self-edge at node {node}"
                )));
            }
        }
        Ok(())
    }

    /// Clone for another node. Grain restarts from the current value; the
    /// per-node tuners diverge from there independently.
    pub(crate) fn per_node(&self) -> Self {
        Self {
            nodes: self.nodes,
            workers: self.workers,
            steal_attempts: self.steal_attempts,
            work_unit: self.work_unit,
            tuning_interval: self.tuning_interval,
            seed: self.seed,
            strategy: Arc::clone(&self.strategy),
            grain: AtomicI64::new(self.grain()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Configuration::new(4, 2).validate().is_ok());
    }

    #[test]
    fn zero_shapes_are_setup_errors() {
        assert!(Configuration::new(0, 2).validate().is_err());
        assert!(Configuration::new(2, 0).validate().is_err());
        assert!(Configuration::new(2, 2)
            .with_work_unit(0)
            .validate()
            .is_err());
    }

    #[test]
    fn grain_floor_is_one() {
        let cfg = Configuration::new(1, 1);
        cfg.set_grain(-5);
        assert_eq!(cfg.grain(), 1);
        assert_eq!(cfg.grain_amount(), 1);
    }

    #[test]
    fn work_unit_seeds_grain() {
        let cfg = Configuration::new(1, 1).with_work_unit(128);
        assert_eq!(cfg.grain(), 128);
        assert_eq!(cfg.work_unit, 128);
    }
}
