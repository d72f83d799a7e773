//! Bag/Fold capability contracts.
//!
//! A computation is expressed as a splittable, mergeable unit of work (the
//! [`Bag`]) plus a combinable partial result (the [`Fold`]). The engine owns
//! all synchronization; implementations only have to honor the contracts
//! below under any interleaving of calls.
//!
//! # Conservation invariant
//!
//! `split` followed by the complementary `merge` must conserve total
//! remaining work. No implementation may destroy or duplicate work through
//! split/merge alone; the engine relies on this to guarantee that stolen
//! and lifeline-delivered fragments neither lose nor double-count anything.
//!
//! # Ownership
//!
//! A bag is owned exclusively by one node (or is in flight during a
//! transfer); ownership moves atomically on send. Within a node, `process`,
//! `split`, and `merge` on the shared queue are serialized by a single
//! lock, so implementations never see concurrent mutation.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A combinable partial result.
///
/// `fold` must be commutative and associative enough that the cluster-wide
/// result is independent of fold order: per-node partials are merged
/// pairwise in whatever order they arrive at the coordinator.
pub trait Fold: Send + Serialize + DeserializeOwned + 'static {
    /// Merge `other`'s contribution into `self`.
    fn fold(&mut self, other: Self);
}

/// A splittable, mergeable unit of work.
pub trait Bag: Send + Serialize + DeserializeOwned + 'static {
    /// The result type this bag contributes to.
    type Result: Fold;

    /// True when no work remains in this bag.
    fn is_empty(&self) -> bool;

    /// True when `split(false)` can return a non-empty disjoint fragment.
    fn is_splittable(&self) -> bool;

    /// Absorb `other`'s content. The engine never passes an alias of `self`.
    fn merge(&mut self, other: Self);

    /// Execute up to `work_amount` units, or until empty.
    ///
    /// `shared` is available for problems that aggregate across workers
    /// during computation rather than only at the end; implementations that
    /// track their contribution internally may ignore it and report through
    /// [`Bag::submit`] instead.
    fn process(&mut self, work_amount: usize, shared: &mut Self::Result);

    /// Return a disjoint fragment, or `None` if nothing can be shared.
    ///
    /// By convention a fragment is half the remaining work. With
    /// `take_all`, the bag surrenders everything it holds even when it
    /// judges itself unsplittable; without it, an unsplittable bag must
    /// return `None`.
    fn split(&mut self, take_all: bool) -> Option<Self>
    where
        Self: Sized;

    /// Contribute this bag's computed contribution into `result`.
    ///
    /// Called exactly once per bag instance at the end of its life, after
    /// all remaining fragments have been merged back.
    fn submit(&mut self, result: &mut Self::Result);
}
