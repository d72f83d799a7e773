//! Structural properties of the lifeline strategies.
//!
//! For any cluster size, a strategy must produce a graph with no
//! self-edges, exact forward/reverse correspondence, and a path from every
//! node to every other node (otherwise an idle node could wait on a
//! lifeline no work can ever travel down).

use std::collections::VecDeque;

use proptest::prelude::*;
use workbag::{HypercubeStrategy, LifelineStrategy, RingStrategy};

/// All nodes reachable from every start node over forward lifeline edges.
fn strongly_connected(strategy: &dyn LifelineStrategy, nodes: usize) -> bool {
    for start in 0..nodes {
        let mut seen = vec![false; nodes];
        seen[start] = true;
        let mut frontier = VecDeque::from([start]);
        while let Some(node) = frontier.pop_front() {
            for peer in strategy.lifeline(node, nodes) {
                if !seen[peer] {
                    seen[peer] = true;
                    frontier.push_back(peer);
                }
            }
        }
        if seen.iter().any(|&s| !s) {
            return false;
        }
    }
    true
}

fn check_strategy(strategy: &dyn LifelineStrategy, nodes: usize) {
    for node in 0..nodes {
        let forward = strategy.lifeline(node, nodes);
        assert!(!forward.contains(&node), "self-edge at {node}/{nodes}");
        assert!(
            forward.iter().all(|&p| p < nodes),
            "edge to out-of-range node at {node}/{nodes}"
        );
        // Forward edge from a node implies a reverse edge at the peer, and
        // the other way around.
        for &peer in &forward {
            assert!(
                strategy.reverse_lifeline(peer, nodes).contains(&node),
                "missing reverse edge {node}->{peer} at {nodes} nodes"
            );
        }
        for &peer in &strategy.reverse_lifeline(node, nodes) {
            assert!(
                strategy.lifeline(peer, nodes).contains(&node),
                "reverse edge without forward edge {peer}->{node} at {nodes} nodes"
            );
        }
    }
    assert!(
        strongly_connected(strategy, nodes),
        "graph not connected at {nodes} nodes"
    );
}

proptest! {
    #[test]
    fn hypercube_is_sound_for_any_cluster_size(nodes in 1usize..300) {
        check_strategy(&HypercubeStrategy, nodes);
    }

    #[test]
    fn ring_is_sound_for_any_cluster_size(nodes in 1usize..300) {
        check_strategy(&RingStrategy, nodes);
    }
}

#[test]
fn hypercube_degree_is_logarithmic() {
    let nodes = 256;
    for node in 0..nodes {
        assert_eq!(HypercubeStrategy.lifeline(node, nodes).len(), 8);
    }
}
