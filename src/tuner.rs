//! Closed-loop grain-size controller.
//!
//! Runs on a dedicated per-node timer. On each firing it compares the
//! logger's counters against the snapshot taken at the previous firing and
//! derives one of two signals:
//!
//! - **Grain too small**: the queue feed count grew more than twice as fast
//!   as the split/empty count. The queue is being fed far more often than
//!   it is profitably split; workers stall on tiny increments.
//! - **Grain too large**: less than 90% of the interval was spent at
//!   maximum worker concurrency. Time went to stealing and synchronization
//!   instead of computing.
//!
//! A signal acts only when it repeats on two *consecutive* firings;
//! single-interval noise is ignored. Confirmed too-small doubles the grain
//! (saturating), confirmed too-large sets `grain/2 + 1`, which can never
//! reach zero. Contradictory or inconclusive intervals reset the pending
//! state without touching the grain. Every committed change lands in the
//! logger's grain history with a timestamp.

use std::time::Instant;

use crate::config::Configuration;
use crate::logger::PlaceLogger;

/// Fraction of an interval that must be spent at maximum concurrency for
/// the grain to be considered not-too-large.
const MAX_CONCURRENCY_TARGET: f64 = 0.9;

/// Feed-to-split ratio above which the grain is considered too small.
const FEED_SPLIT_RATIO: u64 = 2;

/// Per-node tuner contract.
///
/// Both calls return their own timestamp; the engine schedules the next
/// `tune` invocation at `timestamp + tuning_interval`.
///
/// A tuner observes the node through its [`PlaceLogger`] and steers it
/// through the [`Configuration`] handle, whose atomic grain is the one
/// control surface the engine exposes. This narrow view is deliberate:
/// custom tuners plug in different policies over the same counters, not
/// hooks into scheduler internals.
pub trait Tuner: Send {
    /// Called once at node launch to take the initial counter snapshot.
    fn place_launched(&mut self, logger: &PlaceLogger, cfg: &Configuration) -> Instant;

    /// Called on every timer firing; may mutate `cfg.grain`.
    fn tune(&mut self, logger: &PlaceLogger, cfg: &Configuration) -> Instant;
}

/// Interval verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Signal {
    Neutral,
    TooSmall,
    TooLarge,
}

/// Counter snapshot at one tuner firing.
#[derive(Clone, Copy, Debug)]
struct Baseline {
    feeds: u64,
    splits_and_empties: u64,
    nanos_at_max: u64,
    at: Instant,
}

/// Default closed-loop grain controller with two-interval hysteresis.
#[derive(Debug, Default)]
pub struct GrainTuner {
    baseline: Option<Baseline>,
    pending: Option<Signal>,
}

impl GrainTuner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one interval's verdict, honoring the two-consecutive rule.
    /// Returns the new grain when a change was committed.
    fn step(&mut self, signal: Signal, cfg: &Configuration, logger: &PlaceLogger) -> Option<i64> {
        let confirmed = signal != Signal::Neutral && self.pending == Some(signal);
        if !confirmed {
            self.pending = Some(signal);
            return None;
        }
        self.pending = Some(Signal::Neutral);

        let grain = cfg.grain();
        let next = match signal {
            Signal::TooSmall => grain.saturating_mul(2),
            Signal::TooLarge => grain / 2 + 1,
            Signal::Neutral => unreachable!("neutral never confirms"),
        };
        if next == grain {
            return None;
        }
        cfg.set_grain(next);
        logger.record_grain(next);
        Some(next)
    }
}

/// Derive the interval verdict from counter deltas.
///
/// `max_concurrency_fraction` is the share of the interval spent with all
/// workers live. Contradictory evidence (both conditions firing) yields
/// `Neutral`: the interval carries no usable signal.
fn classify(feed_delta: u64, split_empty_delta: u64, max_concurrency_fraction: f64) -> Signal {
    let too_small = feed_delta > 0 && feed_delta > FEED_SPLIT_RATIO * split_empty_delta;
    let too_large = max_concurrency_fraction < MAX_CONCURRENCY_TARGET;
    match (too_small, too_large) {
        (true, false) => Signal::TooSmall,
        (false, true) => Signal::TooLarge,
        _ => Signal::Neutral,
    }
}

impl Tuner for GrainTuner {
    fn place_launched(&mut self, logger: &PlaceLogger, _cfg: &Configuration) -> Instant {
        let now = Instant::now();
        self.baseline = Some(Baseline {
            feeds: logger.feeds(),
            splits_and_empties: logger.splits_and_empties(),
            nanos_at_max: logger.nanos_at_max_concurrency(),
            at: now,
        });
        self.pending = None;
        now
    }

    fn tune(&mut self, logger: &PlaceLogger, cfg: &Configuration) -> Instant {
        let now = Instant::now();
        let feeds = logger.feeds();
        let splits_and_empties = logger.splits_and_empties();
        let nanos_at_max = logger.nanos_at_max_concurrency();

        let Some(prev) = self.baseline.replace(Baseline {
            feeds,
            splits_and_empties,
            nanos_at_max,
            at: now,
        }) else {
            // tune before place_launched: treat as the launch snapshot
            return now;
        };

        let interval = now.duration_since(prev.at).as_nanos() as u64;
        if interval == 0 {
            return now;
        }
        let max_fraction =
            nanos_at_max.saturating_sub(prev.nanos_at_max) as f64 / interval as f64;
        let signal = classify(
            feeds.saturating_sub(prev.feeds),
            splits_and_empties.saturating_sub(prev.splits_and_empties),
            max_fraction,
        );
        self.step(signal, cfg, logger);
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness(grain: i64) -> (Configuration, PlaceLogger, GrainTuner) {
        let cfg = Configuration::new(1, 2).with_work_unit(grain.max(1));
        cfg.set_grain(grain.max(1));
        (cfg, PlaceLogger::new(0, 2), GrainTuner::new())
    }

    #[test]
    fn classify_matrix() {
        // Feeds outpacing splits 3:1 with full utilization: too small.
        assert_eq!(classify(30, 10, 1.0), Signal::TooSmall);
        // Utilization below target with a quiet queue: too large.
        assert_eq!(classify(0, 0, 0.5), Signal::TooLarge);
        // Both at once is contradictory.
        assert_eq!(classify(30, 10, 0.5), Signal::Neutral);
        // Neither: healthy interval.
        assert_eq!(classify(10, 10, 0.95), Signal::Neutral);
        // Ratio exactly 2:1 does not trigger.
        assert_eq!(classify(20, 10, 1.0), Signal::Neutral);
    }

    #[test]
    fn two_consecutive_too_small_signals_double_grain() {
        let (cfg, log, mut tuner) = harness(64);
        assert_eq!(tuner.step(Signal::TooSmall, &cfg, &log), None);
        assert_eq!(cfg.grain(), 64);
        assert_eq!(tuner.step(Signal::TooSmall, &cfg, &log), Some(128));
        assert_eq!(cfg.grain(), 128);
    }

    #[test]
    fn isolated_signal_leaves_grain_unchanged() {
        let (cfg, log, mut tuner) = harness(64);
        tuner.step(Signal::TooSmall, &cfg, &log);
        tuner.step(Signal::Neutral, &cfg, &log);
        tuner.step(Signal::TooSmall, &cfg, &log);
        assert_eq!(cfg.grain(), 64);
    }

    #[test]
    fn contradictory_signals_reset_pending_state() {
        let (cfg, log, mut tuner) = harness(64);
        tuner.step(Signal::TooSmall, &cfg, &log);
        tuner.step(Signal::TooLarge, &cfg, &log);
        tuner.step(Signal::TooSmall, &cfg, &log);
        // Never two consecutive identical signals: no change.
        assert_eq!(cfg.grain(), 64);
    }

    #[test]
    fn confirmation_does_not_chain_without_a_fresh_signal() {
        let (cfg, log, mut tuner) = harness(64);
        tuner.step(Signal::TooSmall, &cfg, &log);
        tuner.step(Signal::TooSmall, &cfg, &log);
        assert_eq!(cfg.grain(), 128);
        // The acted-on signal resets the pending state; a third identical
        // signal starts a new confirmation window instead of acting.
        tuner.step(Signal::TooSmall, &cfg, &log);
        assert_eq!(cfg.grain(), 128);
        tuner.step(Signal::TooSmall, &cfg, &log);
        assert_eq!(cfg.grain(), 256);
    }

    #[test]
    fn too_small_saturates_at_i64_max() {
        let (cfg, log, mut tuner) = harness(i64::MAX);
        tuner.step(Signal::TooSmall, &cfg, &log);
        tuner.step(Signal::TooSmall, &cfg, &log);
        assert_eq!(cfg.grain(), i64::MAX);
    }

    #[test]
    fn too_large_never_drives_grain_to_zero() {
        let (cfg, log, mut tuner) = harness(1 << 20);
        for _ in 0..200 {
            tuner.step(Signal::TooLarge, &cfg, &log);
        }
        assert!(cfg.grain() >= 1, "grain must stay positive");
        // grain/2 + 1 has fixpoint 2 for even values; 1 maps to itself.
        assert_eq!(cfg.grain(), 2);
    }

    #[test]
    fn committed_changes_are_recorded_in_history() {
        let (cfg, log, mut tuner) = harness(64);
        tuner.step(Signal::TooSmall, &cfg, &log);
        tuner.step(Signal::TooSmall, &cfg, &log);
        tuner.step(Signal::TooLarge, &cfg, &log);
        tuner.step(Signal::TooLarge, &cfg, &log);
        let history = log.snapshot().grain_history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].grain, 128);
        assert_eq!(history[1].grain, 65);
    }

    #[test]
    fn live_tune_calls_return_monotonic_timestamps() {
        let (cfg, log, mut tuner) = harness(64);
        let t0 = tuner.place_launched(&log, &cfg);
        let t1 = tuner.tune(&log, &cfg);
        let t2 = tuner.tune(&log, &cfg);
        assert!(t0 <= t1 && t1 <= t2);
    }
}
