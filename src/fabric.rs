//! In-process cluster fabric: node inboxes and distributed quiescence.
//!
//! Nodes are threads in one address space; the fabric gives each an
//! unbounded inbox and moves encoded fragments between them. The engine
//! never touches transport details beyond [`Fabric::send`].
//!
//! # Termination detection
//!
//! [`QuiescenceScope`] is a credit counter. One credit is held per live
//! (non-quiescent) node and one per asynchronous work envelope in flight.
//! The protocol that makes termination safe:
//!
//! - A sender acquires the envelope's credit *before* the send, while it
//!   still holds its own node credit.
//! - The receiver reopens its local state (re-acquires a node credit)
//!   *before* releasing the envelope credit.
//!
//! Under this ordering the count can only reach zero when every node is
//! simultaneously quiescent and nothing is in flight; work arriving after a
//! node reported quiescent always reopens that node before any termination
//! signal can be honored.
//!
//! Synchronous steal request/reply pairs carry no credit: the thief blocks
//! on the reply while still holding its node credit, so the exchange is
//! covered by the thief's own liveness.

use std::sync::{Arc, Condvar, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::codec::Envelope;
use crate::error::SchedulerError;

/// A message addressed to one node's steal manager.
pub(crate) enum Message {
    /// Active steal: the victim replies on `reply` with a fragment or
    /// `None` if it has nothing splittable.
    StealRequest {
        thief: usize,
        reply: Sender<Option<Envelope>>,
    },
    /// The thief registers itself as passively waiting on this node.
    LifelineRegister { thief: usize },
    /// Asynchronous work delivery (steal-round merge target or lifeline).
    /// Carries the in-flight credit; the receiver reopens before dropping it.
    Deliver {
        from: usize,
        envelope: Envelope,
        credit: Credit,
    },
    /// Global termination was declared; drain and exit.
    Terminate,
}

// ----------------------------------------------------------------------
// Quiescence scope
// ----------------------------------------------------------------------

#[derive(Debug)]
struct ScopeState {
    credits: usize,
    failure: Option<SchedulerError>,
}

#[derive(Debug)]
struct ScopeInner {
    state: Mutex<ScopeState>,
    cv: Condvar,
}

/// One unit of liveness: a live node or an envelope in flight.
///
/// Dropping the credit releases it. The coordinator's wait completes when
/// the last credit drops.
pub(crate) struct Credit {
    inner: Arc<ScopeInner>,
}

impl Drop for Credit {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().expect("scope state poisoned");
        debug_assert!(state.credits > 0, "credit underflow");
        state.credits -= 1;
        if state.credits == 0 {
            self.inner.cv.notify_all();
        }
    }
}

/// Credit-counting distributed quiescence detector.
#[derive(Clone)]
pub(crate) struct QuiescenceScope {
    inner: Arc<ScopeInner>,
}

impl QuiescenceScope {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                state: Mutex::new(ScopeState {
                    credits: 0,
                    failure: None,
                }),
                cv: Condvar::new(),
            }),
        }
    }

    /// Acquire one credit.
    pub(crate) fn acquire(&self) -> Credit {
        let mut state = self.inner.state.lock().expect("scope state poisoned");
        state.credits += 1;
        Credit {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Record a fatal error and wake the coordinator. The first failure
    /// wins; later ones are dropped.
    pub(crate) fn fail(&self, err: SchedulerError) {
        let mut state = self.inner.state.lock().expect("scope state poisoned");
        if state.failure.is_none() {
            state.failure = Some(err);
        }
        self.inner.cv.notify_all();
    }

    /// Block until every credit has been released or a failure was
    /// recorded, whichever comes first.
    pub(crate) fn block_until_quiescent(&self) -> Result<(), SchedulerError> {
        let mut state = self.inner.state.lock().expect("scope state poisoned");
        loop {
            if let Some(err) = state.failure.take() {
                return Err(err);
            }
            if state.credits == 0 {
                return Ok(());
            }
            state = self.inner.cv.wait(state).expect("scope state poisoned");
        }
    }
}

// ----------------------------------------------------------------------
// Fabric
// ----------------------------------------------------------------------

/// Senders to every node inbox.
#[derive(Clone)]
pub(crate) struct Fabric {
    senders: Vec<Sender<Message>>,
}

impl Fabric {
    /// Build the fabric and hand back one inbox receiver per node.
    pub(crate) fn new(nodes: usize) -> (Self, Vec<Receiver<Message>>) {
        let mut senders = Vec::with_capacity(nodes);
        let mut receivers = Vec::with_capacity(nodes);
        for _ in 0..nodes {
            let (tx, rx) = unbounded();
            senders.push(tx);
            receivers.push(rx);
        }
        (Self { senders }, receivers)
    }

    /// Deliver a message to `to`'s inbox. A disconnected inbox means the
    /// node is gone, which is fatal to the run.
    pub(crate) fn send(&self, to: usize, msg: Message) -> Result<(), SchedulerError> {
        self.senders[to]
            .send(msg)
            .map_err(|_| SchedulerError::RemoteUnavailable { node: to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn scope_completes_when_all_credits_drop() {
        let scope = QuiescenceScope::new();
        let a = scope.acquire();
        let b = scope.acquire();

        let waiter = {
            let scope = scope.clone();
            thread::spawn(move || scope.block_until_quiescent())
        };

        drop(a);
        thread::sleep(Duration::from_millis(10));
        assert!(!waiter.is_finished(), "one credit still outstanding");
        drop(b);
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn reopen_before_release_keeps_scope_open() {
        // Simulates a delivery: the receiver reopens (new node credit)
        // before dropping the envelope credit, so the count never dips to
        // zero in between.
        let scope = QuiescenceScope::new();
        let envelope_credit = scope.acquire();
        let node_credit = scope.acquire();
        drop(envelope_credit);

        let waiter = {
            let scope = scope.clone();
            thread::spawn(move || scope.block_until_quiescent())
        };
        thread::sleep(Duration::from_millis(10));
        assert!(!waiter.is_finished(), "reopened node must hold the scope");
        drop(node_credit);
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn failure_wakes_the_coordinator() {
        let scope = QuiescenceScope::new();
        let _held = scope.acquire();
        let waiter = {
            let scope = scope.clone();
            thread::spawn(move || scope.block_until_quiescent())
        };
        scope.fail(SchedulerError::RemoteUnavailable { node: 1 });
        let err = waiter.join().unwrap().unwrap_err();
        assert!(matches!(err, SchedulerError::RemoteUnavailable { node: 1 }));
    }

    #[test]
    fn send_to_dropped_inbox_is_remote_unavailable() {
        let (fabric, receivers) = Fabric::new(2);
        drop(receivers);
        let err = fabric.send(1, Message::Terminate).unwrap_err();
        assert!(matches!(err, SchedulerError::RemoteUnavailable { node: 1 }));
    }

    #[test]
    fn messages_arrive_in_order_per_inbox() {
        let (fabric, mut receivers) = Fabric::new(1);
        let rx = receivers.remove(0);
        fabric
            .send(0, Message::LifelineRegister { thief: 3 })
            .unwrap();
        fabric.send(0, Message::Terminate).unwrap();
        assert!(matches!(
            rx.recv().unwrap(),
            Message::LifelineRegister { thief: 3 }
        ));
        assert!(matches!(rx.recv().unwrap(), Message::Terminate));
    }
}
