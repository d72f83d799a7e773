//! Lifeline-based work-stealing scheduler over an in-process node fabric.
//!
//! ## Scope
//! This crate runs a user-defined splittable computation ([`Bag`]) across a
//! cluster of nodes (threads standing in for machines), each with its own
//! pool of worker threads, and folds the per-node partial results
//! ([`Fold`]) into one value at termination.
//!
//! ## Key invariants
//! - Work is conserved: split/merge/transfer never lose or duplicate units,
//!   and a fragment leaves its queue only after encoding succeeded.
//! - Steal and termination signals are honored at grain boundaries, so
//!   steal latency is bounded by one grain's processing time.
//! - Termination is declared only when every node is simultaneously
//!   quiescent with nothing in flight (credit-counting scope).
//! - Each node's final fold is contributed exactly once.
//!
//! ## Engine flow (one node)
//! 1) Workers drain the shared queue in grain-sized steps, splitting off
//!    private fragments under contention.
//! 2) On exhaustion the steal manager runs a bounded round of randomized
//!    active steals.
//! 3) An unsuccessful round ends in lifeline-wait: register on the lifeline
//!    graph, release the liveness credit, block until delivery.
//! 4) Nodes holding surplus push fragments to registered thieves.
//! 5) A tuner thread re-fits the grain from queue-feed and concurrency
//!    signals on a fixed interval.
//!
//! ## Notable entry points
//! - [`compute`] / [`compute_with_report`]: run a bag to completion.
//! - [`Bag`] / [`Fold`]: the capability contracts a workload implements.
//! - [`Configuration`]: cluster shape, grain, steal budget, lifeline graph.
//! - [`RunReport`]: per-node steal/lifeline/concurrency diagnostics.
//!
//! ## Design trade-offs
//! One mutex around each node's shared bag trades fine-grained parallelism
//! for contract simplicity: implementations never see concurrent mutation.
//! Workers compensate by processing split-off private fragments outside
//! the lock.

mod cluster;
mod fabric;
mod place;

pub mod bag;
pub mod codec;
pub mod config;
pub mod demo;
pub mod error;
pub mod lifeline;
pub mod logger;
pub mod rng;
pub mod tuner;

pub use bag::{Bag, Fold};
pub use cluster::{compute, compute_with_report};
pub use codec::{decode_fragment, encode_fragment, Envelope, WIRE_VERSION};
pub use config::{
    Configuration, DEFAULT_GRAIN, DEFAULT_STEAL_ATTEMPTS, DEFAULT_TUNING_INTERVAL,
};
pub use error::SchedulerError;
pub use lifeline::{HypercubeStrategy, LifelineStrategy, RingStrategy};
pub use logger::{GrainChange, LoggerSnapshot, PlaceLogger, RunReport};
pub use tuner::{GrainTuner, Tuner};
