//! Per-node scheduler engine.
//!
//! One `Place` owns the node's intra-node queue (a single shared [`Bag`]
//! behind one mutex), a pool of worker threads draining it, a steal-manager
//! thread speaking the two-tier steal protocol, and a tuner thread on a
//! fixed timer.
//!
//! # Worker loop
//!
//! A worker acquires the queue lock and processes one grain directly on the
//! shared bag — unless other workers are competing for the queue, in which
//! case it splits off a disjoint private fragment and processes that
//! outside the lock, re-checking for drain/surrender signals at every grain
//! boundary. Private fragments are merged back when exhausted or when the
//! node is asked to contribute to a steal. There is no mid-grain
//! cancellation: termination and steal signals are observed only at grain
//! boundaries and lock acquisition points, which bounds worst-case steal
//! latency by one grain's processing time.
//!
//! # Steal protocol
//!
//! On full local exhaustion (queue empty, all workers idle) the manager
//! issues up to `steal_attempts` requests to distinct uniformly-drawn
//! victims. While blocked on a reply it keeps servicing its own inbox, so
//! two nodes stealing from each other cannot deadlock. An unsuccessful
//! round ends in lifeline-wait: the node registers on its lifeline victims
//! and releases its liveness credit. Any later delivery re-acquires the
//! credit *before* the envelope credit is released (see [`crate::fabric`]).
//!
//! # Local quiescence
//!
//! queue empty + all workers idle + steal budget exhausted + lifeline
//! registrations posted. The node then holds no credit and issues no sends
//! until work arrives and reopens it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use crossbeam_utils::sync::{Parker, Unparker};

use crate::bag::{Bag, Fold};
use crate::codec::{decode_fragment, encode_fragment, Envelope};
use crate::config::Configuration;
use crate::error::SchedulerError;
use crate::fabric::{Credit, Fabric, Message, QuiescenceScope};
use crate::logger::PlaceLogger;
use crate::rng::XorShift64;
use crate::tuner::{GrainTuner, Tuner};

/// Inbox poll interval for the steal manager.
const SERVICE_TICK: Duration = Duration::from_micros(200);

/// Everything a node needs at launch.
pub(crate) struct PlaceCtx<B: Bag> {
    pub id: usize,
    pub cfg: Arc<Configuration>,
    pub logger: Arc<PlaceLogger>,
    pub fabric: Fabric,
    pub scope: QuiescenceScope,
    pub inbox: Receiver<Message>,
    /// Liveness credit held while this node is not locally quiescent.
    pub credit: Credit,
    pub initial: B,
    pub result_factory: Arc<dyn Fn() -> B::Result + Send + Sync>,
    pub result_tx: Sender<(usize, Envelope)>,
}

/// Shared intra-node queue state. The single mutex serializes `process`,
/// `split`, and `merge` on the shared bag, per the Bag contract.
struct QueueState<B: Bag> {
    bag: B,
    result: B::Result,
    /// Workers currently not idle.
    active: usize,
    draining: bool,
    /// Set when a steal found the shared bag unsplittable while workers
    /// hold private fragments; the next worker to notice merges back.
    surrender: bool,
}

struct PlaceShared<B: Bag> {
    queue: Mutex<QueueState<B>>,
    cv: Condvar,
}

/// Run one node to completion. Fatal errors are recorded on the scope so
/// the coordinator wakes up and aborts the run.
pub(crate) fn run<B: Bag>(ctx: PlaceCtx<B>) {
    let scope = ctx.scope.clone();
    let mut manager = match Manager::launch(ctx) {
        Ok(m) => m,
        Err(err) => {
            scope.fail(err);
            return;
        }
    };
    let outcome = manager.run_loop();
    manager.begin_drain();
    if let Err(err) = outcome.and_then(|_| manager.finish()) {
        scope.fail(err);
    }
}

// ======================================================================
// Steal manager
// ======================================================================

struct Manager<B: Bag> {
    id: usize,
    cfg: Arc<Configuration>,
    logger: Arc<PlaceLogger>,
    fabric: Fabric,
    scope: QuiescenceScope,
    inbox: Receiver<Message>,
    shared: Arc<PlaceShared<B>>,
    /// Held while not locally quiescent; `None` means lifeline-wait.
    credit: Option<Credit>,
    /// Thieves passively waiting on this node.
    waiters: HashSet<usize>,
    /// Whether our own lifeline registrations are currently posted.
    registered: bool,
    rng: XorShift64,
    draining: bool,
    workers: Vec<JoinHandle<()>>,
    tuner_thread: Option<JoinHandle<()>>,
    tuner_stop: Arc<AtomicBool>,
    tuner_unparker: Unparker,
    result_tx: Sender<(usize, Envelope)>,
}

impl<B: Bag> Manager<B> {
    fn launch(ctx: PlaceCtx<B>) -> Result<Self, SchedulerError> {
        let PlaceCtx {
            id,
            cfg,
            logger,
            fabric,
            scope,
            inbox,
            credit,
            initial,
            result_factory,
            result_tx,
        } = ctx;

        let shared = Arc::new(PlaceShared {
            queue: Mutex::new(QueueState {
                bag: initial,
                result: (result_factory)(),
                active: cfg.workers,
                draining: false,
                surrender: false,
            }),
            cv: Condvar::new(),
        });
        logger.set_live(cfg.workers);

        let mut workers = Vec::with_capacity(cfg.workers);
        for wid in 0..cfg.workers {
            let worker_shared = Arc::clone(&shared);
            let worker_cfg = Arc::clone(&cfg);
            let worker_logger = Arc::clone(&logger);
            let local = (result_factory)();
            let spawned = thread::Builder::new()
                .name(format!("workbag-n{id}-w{wid}"))
                .spawn(move || worker_loop(&worker_shared, &worker_cfg, &worker_logger, local));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Release the workers that did start before bailing.
                    {
                        let mut q = shared.queue.lock().expect("queue lock poisoned");
                        q.draining = true;
                        shared.cv.notify_all();
                    }
                    for h in workers {
                        let _ = h.join();
                    }
                    return Err(SchedulerError::Setup(format!(
                        "failed to spawn worker {wid} at node {id}: {e}"
                    )));
                }
            }
        }

        let tuner_stop = Arc::new(AtomicBool::new(false));
        let parker = Parker::new();
        let tuner_unparker = parker.unparker().clone();
        let tuner_thread = {
            let cfg = Arc::clone(&cfg);
            let logger = Arc::clone(&logger);
            let stop = Arc::clone(&tuner_stop);
            thread::Builder::new()
                .name(format!("workbag-n{id}-tuner"))
                .spawn(move || tuner_loop(&parker, &stop, &logger, &cfg))
                .map_err(|e| {
                    SchedulerError::Setup(format!("failed to spawn tuner at node {id}: {e}"))
                })?
        };

        let seed = cfg.seed ^ (id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        Ok(Self {
            id,
            rng: XorShift64::new(seed),
            cfg,
            logger,
            fabric,
            scope,
            inbox,
            shared,
            credit: Some(credit),
            waiters: HashSet::new(),
            registered: false,
            draining: false,
            workers,
            tuner_thread: Some(tuner_thread),
            tuner_stop,
            tuner_unparker,
            result_tx,
        })
    }

    /// Main protocol loop: service the inbox, feed registered thieves, and
    /// run steal rounds when the node is exhausted. Returns on `Terminate`.
    fn run_loop(&mut self) -> Result<(), SchedulerError> {
        loop {
            match self.inbox.recv_timeout(SERVICE_TICK) {
                Ok(msg) => {
                    self.handle(msg)?;
                    while let Ok(msg) = self.inbox.try_recv() {
                        self.handle(msg)?;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SchedulerError::RemoteUnavailable { node: self.id });
                }
            }
            if self.draining {
                return Ok(());
            }

            // Surplus re-check for passively waiting thieves.
            self.service_lifelines()?;

            if self.credit.is_some() && self.locally_exhausted() {
                let refilled = self.steal_round()?;
                if self.draining {
                    return Ok(());
                }
                if !refilled && self.locally_exhausted() {
                    self.register_lifelines()?;
                    // Locally quiescent: no further sends until a delivery
                    // reopens this node.
                    self.credit = None;
                }
            }
        }
    }

    fn handle(&mut self, msg: Message) -> Result<(), SchedulerError> {
        match msg {
            Message::StealRequest { thief, reply } => self.answer_steal(thief, reply),
            Message::LifelineRegister { thief } => {
                self.waiters.insert(thief);
                Ok(())
            }
            Message::Deliver {
                from: _,
                envelope,
                credit,
            } => self.receive_delivery(envelope, credit),
            Message::Terminate => {
                self.begin_drain();
                Ok(())
            }
        }
    }

    /// Serve an active-steal request against the shared queue.
    fn answer_steal(
        &mut self,
        thief: usize,
        reply: Sender<Option<Envelope>>,
    ) -> Result<(), SchedulerError> {
        let fragment = {
            let mut q = self.shared.queue.lock().expect("queue lock poisoned");
            if q.bag.is_splittable() {
                q.bag.split(false)
            } else {
                if q.active > 0 && !q.draining {
                    // Workers may hold private fragments; ask for them back
                    // so a later request or lifeline check finds content.
                    q.surrender = true;
                    self.shared.cv.notify_all();
                }
                None
            }
        };

        let answer = match fragment {
            Some(frag) if !frag.is_empty() => {
                self.logger.inc_splits();
                match encode_fragment(self.id, &frag) {
                    Ok(env) => Some(env),
                    Err(err) => {
                        // Not removed until transfer is possible: merge the
                        // fragment back before surfacing the codec failure.
                        let mut q = self.shared.queue.lock().expect("queue lock poisoned");
                        q.bag.merge(frag);
                        self.shared.cv.notify_all();
                        let _ = reply.send(None);
                        return Err(err);
                    }
                }
            }
            Some(frag) => {
                // Defensive: an empty "fragment" is merged back, answered
                // as a miss.
                let mut q = self.shared.queue.lock().expect("queue lock poisoned");
                q.bag.merge(frag);
                None
            }
            None => {
                self.logger.inc_empties();
                None
            }
        };

        if reply.send(answer).is_err() && !self.draining {
            return Err(SchedulerError::RemoteUnavailable { node: thief });
        }
        Ok(())
    }

    /// Merge an asynchronous work delivery, reopening local state first.
    fn receive_delivery(&mut self, envelope: Envelope, credit: Credit) -> Result<(), SchedulerError> {
        // Reopen before the in-flight credit is released; the scope count
        // never dips through zero while this work exists.
        if self.credit.is_none() {
            self.credit = Some(self.scope.acquire());
        }
        let frag: B = decode_fragment(self.id, &envelope)?;
        {
            let mut q = self.shared.queue.lock().expect("queue lock poisoned");
            if !frag.is_empty() {
                self.logger.inc_feeds();
            }
            q.bag.merge(frag);
            self.shared.cv.notify_all();
        }
        self.logger.inc_lifelines_received();
        self.registered = false;
        drop(credit);
        Ok(())
    }

    fn locally_exhausted(&self) -> bool {
        let q = self.shared.queue.lock().expect("queue lock poisoned");
        !q.draining && q.bag.is_empty() && q.active == 0
    }

    /// One active-steal round: up to `steal_attempts` distinct victims,
    /// drawn uniformly without replacement. Returns true when the queue
    /// was refilled (by a hit or by a delivery that raced the round).
    fn steal_round(&mut self) -> Result<bool, SchedulerError> {
        let nodes = self.cfg.nodes;
        if nodes <= 1 {
            return Ok(false);
        }
        let mut victims: Vec<usize> = (0..nodes).filter(|&n| n != self.id).collect();
        let budget = self.cfg.steal_attempts.min(victims.len());
        self.rng.shuffle_prefix(&mut victims, budget);

        let inbox = self.inbox.clone();
        for &victim in &victims[..budget] {
            if self.draining {
                return Ok(false);
            }
            self.logger.inc_steal_attempts();
            let (reply_tx, reply_rx) = bounded(1);
            self.fabric.send(
                victim,
                Message::StealRequest {
                    thief: self.id,
                    reply: reply_tx,
                },
            )?;

            // Block on the reply while still servicing our own inbox, so
            // mutual steal requests cannot deadlock.
            loop {
                select! {
                    recv(reply_rx) -> answer => {
                        match answer {
                            Ok(Some(envelope)) => {
                                let frag: B = decode_fragment(self.id, &envelope)?;
                                self.logger.inc_steal_successes();
                                {
                                    let mut q = self.shared.queue.lock().expect("queue lock poisoned");
                                    if !frag.is_empty() {
                                        self.logger.inc_feeds();
                                    }
                                    q.bag.merge(frag);
                                    self.shared.cv.notify_all();
                                }
                                // A fresh surplus: feed waiting thieves.
                                self.service_lifelines()?;
                                return Ok(true);
                            }
                            Ok(None) => break,
                            Err(_) => {
                                return Err(SchedulerError::RemoteUnavailable { node: victim });
                            }
                        }
                    }
                    recv(inbox) -> msg => {
                        match msg {
                            Ok(msg) => {
                                self.handle(msg)?;
                                if self.draining {
                                    return Ok(false);
                                }
                            }
                            Err(_) => {
                                return Err(SchedulerError::RemoteUnavailable { node: self.id });
                            }
                        }
                    }
                }
            }

            // A delivery may have refilled the queue mid-attempt.
            if !self.locally_exhausted() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Proactively push work to registered thieves while we hold surplus.
    fn service_lifelines(&mut self) -> Result<(), SchedulerError> {
        if self.draining {
            return Ok(());
        }
        while let Some(&thief) = self.waiters.iter().next() {
            let fragment = {
                let mut q = self.shared.queue.lock().expect("queue lock poisoned");
                if q.draining || !q.bag.is_splittable() {
                    None
                } else {
                    q.bag.split(false)
                }
            };
            let Some(frag) = fragment else { break };
            if frag.is_empty() {
                let mut q = self.shared.queue.lock().expect("queue lock poisoned");
                q.bag.merge(frag);
                break;
            }
            self.logger.inc_splits();
            let envelope = match encode_fragment(self.id, &frag) {
                Ok(env) => env,
                Err(err) => {
                    let mut q = self.shared.queue.lock().expect("queue lock poisoned");
                    q.bag.merge(frag);
                    self.shared.cv.notify_all();
                    return Err(err);
                }
            };
            // Credit travels with the envelope; acquired while we still
            // hold our own node credit.
            let credit = self.scope.acquire();
            self.waiters.remove(&thief);
            self.logger.inc_lifelines_sent();
            self.fabric.send(
                thief,
                Message::Deliver {
                    from: self.id,
                    envelope,
                    credit,
                },
            )?;
        }
        Ok(())
    }

    /// Post registrations on every lifeline victim. Idempotent until a
    /// delivery clears the registered flag.
    fn register_lifelines(&mut self) -> Result<(), SchedulerError> {
        if self.registered {
            return Ok(());
        }
        for victim in self.cfg.strategy.lifeline(self.id, self.cfg.nodes) {
            self.fabric
                .send(victim, Message::LifelineRegister { thief: self.id })?;
        }
        self.registered = true;
        Ok(())
    }

    /// Begin local drain: flip the queue flag and wake everyone.
    fn begin_drain(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;
        self.waiters.clear();
        let mut q = self.shared.queue.lock().expect("queue lock poisoned");
        q.draining = true;
        self.shared.cv.notify_all();
    }

    /// Join workers and the tuner, produce the node's final fold exactly
    /// once, and ship it to the coordinator.
    fn finish(mut self) -> Result<(), SchedulerError> {
        let mut worker_panicked = false;
        for handle in self.workers.drain(..) {
            worker_panicked |= handle.join().is_err();
        }
        self.tuner_stop.store(true, Ordering::Release);
        self.tuner_unparker.unpark();
        if let Some(handle) = self.tuner_thread.take() {
            let _ = handle.join();
        }
        if worker_panicked {
            return Err(SchedulerError::Setup(format!(
                "worker thread panicked at node {}",
                self.id
            )));
        }

        let shared = Arc::try_unwrap(self.shared).map_err(|_| {
            SchedulerError::Setup(format!("node {} queue still referenced at drain", self.id))
        })?;
        let mut state = shared.queue.into_inner().expect("queue lock poisoned");
        let mut result = state.result;
        // Workers folded their locals and merged private fragments during
        // drain; whatever the bag still tracks is contributed here, once.
        state.bag.submit(&mut result);

        let envelope = encode_fragment(self.id, &result)?;
        self.result_tx
            .send((self.id, envelope))
            .map_err(|_| SchedulerError::RemoteUnavailable { node: self.id })?;
        Ok(())
    }
}

// ======================================================================
// Worker loop
// ======================================================================

/// Drain the shared queue in grain-sized steps.
///
/// `RUNNING ↔ IDLE` transitions go through `QueueState.active` and the
/// logger's concurrency clock. The local fold accumulates contributions
/// from private processing and is folded into the shared result at drain.
fn worker_loop<B: Bag>(
    shared: &PlaceShared<B>,
    cfg: &Configuration,
    logger: &PlaceLogger,
    mut local: B::Result,
) {
    let mut private: Option<B> = None;
    let mut q = shared.queue.lock().expect("queue lock poisoned");
    loop {
        if q.draining {
            if let Some(p) = private.take() {
                q.bag.merge(p);
            }
            q.active -= 1;
            logger.set_live(q.active);
            q.result.fold(local);
            shared.cv.notify_all();
            return;
        }

        if q.surrender {
            if let Some(p) = private.take() {
                q.surrender = false;
                if !p.is_empty() {
                    logger.inc_feeds();
                }
                q.bag.merge(p);
                shared.cv.notify_all();
            }
        }

        if let Some(mut bag) = private.take() {
            // Grain-bounded private processing outside the queue lock.
            drop(q);
            bag.process(cfg.grain_amount(), &mut local);
            q = shared.queue.lock().expect("queue lock poisoned");
            if bag.is_empty() {
                // Return the husk so internally tracked contributions are
                // conserved in the shared bag.
                q.bag.merge(bag);
            } else {
                private = Some(bag);
            }
            continue;
        }

        if q.bag.is_empty() {
            q.active -= 1;
            logger.set_live(q.active);
            logger.inc_empties();
            // Exhaustion is observed by the manager through `active`.
            shared.cv.notify_all();
            while q.bag.is_empty() && !q.draining {
                q = shared.cv.wait(q).expect("queue lock poisoned");
            }
            q.active += 1;
            logger.set_live(q.active);
            continue;
        }

        // Queue has content. Under contention take a disjoint private
        // slice; alone (or unsplittable), process one grain in place and
        // release the lock so the steal manager can cut in between grains.
        if q.active > 1 && q.bag.is_splittable() {
            if let Some(frag) = q.bag.split(false) {
                logger.inc_splits();
                private = Some(frag);
                continue;
            }
        }
        {
            let QueueState { bag, result, .. } = &mut *q;
            bag.process(cfg.grain_amount(), result);
        }
        drop(q);
        q = shared.queue.lock().expect("queue lock poisoned");
    }
}

// ======================================================================
// Tuner timer
// ======================================================================

/// Fixed-interval tuner driver. The next firing is scheduled from the
/// timestamp the tuner itself returned.
fn tuner_loop(parker: &Parker, stop: &AtomicBool, logger: &PlaceLogger, cfg: &Configuration) {
    let mut tuner = GrainTuner::new();
    let mut at = tuner.place_launched(logger, cfg);
    while !stop.load(Ordering::Acquire) {
        let next = at + cfg.tuning_interval;
        let now = Instant::now();
        if next > now {
            parker.park_timeout(next - now);
        }
        if stop.load(Ordering::Acquire) {
            break;
        }
        at = tuner.tune(logger, cfg);
    }
}
