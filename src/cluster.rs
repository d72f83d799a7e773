//! Cluster bootstrap, termination, and result aggregation.
//!
//! [`compute`] is the single entry point: it validates the configuration,
//! spawns one place thread per node (node 0 seeded with the initial bag,
//! the rest empty), hands every node a liveness credit up front, and blocks
//! until the credit count reaches zero or a node records a fatal error.
//! On quiescence it broadcasts `Terminate`, joins the places, and folds the
//! per-node partial results in arrival order.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;

use crate::bag::{Bag, Fold};
use crate::codec::decode_fragment;
use crate::config::Configuration;
use crate::error::SchedulerError;
use crate::fabric::{Fabric, Message, QuiescenceScope};
use crate::logger::{PlaceLogger, RunReport};
use crate::place::{self, PlaceCtx};

/// Run `initial` to global completion and return the folded result.
///
/// `result_factory` builds neutral fold values (one shared per node, one
/// per worker, one for final aggregation); `empty_bag_factory` builds the
/// empty bags that bootstrap nodes 1..n.
pub fn compute<B, RF, BF>(
    initial: B,
    result_factory: RF,
    empty_bag_factory: BF,
    cfg: Configuration,
) -> Result<B::Result, SchedulerError>
where
    B: Bag,
    RF: Fn() -> B::Result + Send + Sync + 'static,
    BF: FnMut() -> B,
{
    compute_with_report(initial, result_factory, empty_bag_factory, cfg).map(|(result, _)| result)
}

/// [`compute`], additionally returning the per-node diagnostics report.
pub fn compute_with_report<B, RF, BF>(
    initial: B,
    result_factory: RF,
    mut empty_bag_factory: BF,
    cfg: Configuration,
) -> Result<(B::Result, RunReport), SchedulerError>
where
    B: Bag,
    RF: Fn() -> B::Result + Send + Sync + 'static,
    BF: FnMut() -> B,
{
    cfg.validate()?;
    let nodes = cfg.nodes;

    let scope = QuiescenceScope::new();
    let (fabric, receivers) = Fabric::new(nodes);
    let (result_tx, result_rx) = unbounded();
    let result_factory: Arc<dyn Fn() -> B::Result + Send + Sync> = Arc::new(result_factory);

    let mut initial = Some(initial);
    let mut loggers = Vec::with_capacity(nodes);
    let mut places = Vec::with_capacity(nodes);
    let mut spawn_error = None;

    for (id, inbox) in receivers.into_iter().enumerate() {
        let logger = Arc::new(PlaceLogger::new(id, cfg.workers));
        loggers.push(Arc::clone(&logger));
        let bag = match initial.take() {
            Some(seeded) => seeded,
            None => empty_bag_factory(),
        };
        // The node's credit is issued before its thread exists, so the
        // scope cannot hit zero while any node is still starting up.
        let ctx = PlaceCtx {
            id,
            cfg: Arc::new(cfg.per_node()),
            logger,
            fabric: fabric.clone(),
            scope: scope.clone(),
            inbox,
            credit: scope.acquire(),
            initial: bag,
            result_factory: Arc::clone(&result_factory),
            result_tx: result_tx.clone(),
        };
        let spawned = thread::Builder::new()
            .name(format!("workbag-place-{id}"))
            .spawn(move || place::run(ctx));
        match spawned {
            Ok(handle) => places.push(handle),
            Err(e) => {
                spawn_error = Some(SchedulerError::Setup(format!(
                    "failed to spawn node {id}: {e}"
                )));
                break;
            }
        }
    }
    drop(result_tx);

    let waited = match spawn_error {
        // Nodes that did start are told to drain before we give up.
        Some(err) => Err(err),
        None => scope.block_until_quiescent(),
    };

    for id in 0..places.len() {
        let _ = fabric.send(id, Message::Terminate);
    }
    for handle in places {
        let _ = handle.join();
    }
    waited?;

    let mut result = (result_factory)();
    let mut received = 0usize;
    while let Ok((node, envelope)) = result_rx.recv() {
        let partial: B::Result = decode_fragment(node, &envelope)?;
        result.fold(partial);
        received += 1;
    }
    if received != nodes {
        return Err(SchedulerError::Setup(format!(
            "expected {nodes} node results, received {received}"
        )));
    }

    let report = RunReport {
        nodes: loggers.iter().map(|l| l.snapshot()).collect(),
    };
    Ok((result, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::{CountFold, CountdownBag};

    #[test]
    fn invalid_configuration_is_rejected_before_spawning() {
        let err = compute(
            CountdownBag::seeded(10, 2),
            CountFold::default,
            CountdownBag::empty,
            Configuration::new(0, 1),
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::Setup(_)));
    }

    #[test]
    fn single_node_single_worker_counts_everything() {
        let result = compute(
            CountdownBag::seeded(10_000, 4),
            CountFold::default,
            CountdownBag::empty,
            Configuration::new(1, 1).with_work_unit(64),
        )
        .unwrap();
        assert_eq!(result.count, 10_000);
    }

    #[test]
    fn empty_initial_bag_terminates_immediately() {
        let result = compute(
            CountdownBag::empty(),
            CountFold::default,
            CountdownBag::empty,
            Configuration::new(2, 2),
        )
        .unwrap();
        assert_eq!(result.count, 0);
    }
}
