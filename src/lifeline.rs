//! Lifeline strategies: the static passive-steal graph.
//!
//! A lifeline is a precomputed thief→victim edge. When a node exhausts its
//! active-steal budget it registers on every node returned by
//! [`LifelineStrategy::lifeline`]; those victims later push work to it
//! proactively. The inverse lookup, [`LifelineStrategy::reverse_lifeline`],
//! is what a victim consults to know who may be waiting on it.
//!
//! # Invariants
//!
//! - `reverse_lifeline(v, n)` must equal `{t : v ∈ lifeline(t, n)}`.
//! - The directed graph induced by `lifeline` over `0..n` must be connected
//!   for every `n ≥ 1`. A disconnected graph starves the unreachable
//!   component; that is a configuration error, not a runtime condition.
//! - No self-edges: `i ∉ lifeline(i, n)`.

use std::fmt;

/// Computes the static passive-steal graph among nodes.
///
/// Implementations must be pure: the same `(node, nodes)` pair always
/// yields the same edge set, on every node of the cluster.
pub trait LifelineStrategy: Send + Sync + fmt::Debug {
    /// Victims node `node` registers on when starved (thief→victim edges).
    fn lifeline(&self, node: usize, nodes: usize) -> Vec<usize>;

    /// Thieves that may register on `node`: `{t : node ∈ lifeline(t, nodes)}`.
    fn reverse_lifeline(&self, node: usize, nodes: usize) -> Vec<usize>;
}

/// Hypercube lifeline graph.
///
/// Node `i` is connected to every id that differs from `i` in exactly one
/// bit position and is still a valid node id. For non-power-of-two node
/// counts the out-of-range neighbors are dropped; the remaining graph stays
/// connected because clearing the highest set bit of any id always yields a
/// smaller valid id, giving every node a path to node 0.
///
/// The graph is symmetric (`i ^ b ^ b == i`), so the reverse edge set
/// equals the forward one.
#[derive(Clone, Copy, Debug, Default)]
pub struct HypercubeStrategy;

impl LifelineStrategy for HypercubeStrategy {
    fn lifeline(&self, node: usize, nodes: usize) -> Vec<usize> {
        debug_assert!(node < nodes, "node id out of range");
        let mut out = Vec::new();
        let mut bit = 1usize;
        while bit < nodes {
            let peer = node ^ bit;
            if peer < nodes {
                out.push(peer);
            }
            bit <<= 1;
        }
        out
    }

    fn reverse_lifeline(&self, node: usize, nodes: usize) -> Vec<usize> {
        self.lifeline(node, nodes)
    }
}

/// Ring lifeline graph.
///
/// Each node has a single lifeline to its predecessor, so work drains
/// around the ring in one direction. Cheaper registration traffic than the
/// hypercube (one edge per node) at the cost of a longer worst-case
/// propagation path.
#[derive(Clone, Copy, Debug, Default)]
pub struct RingStrategy;

impl LifelineStrategy for RingStrategy {
    fn lifeline(&self, node: usize, nodes: usize) -> Vec<usize> {
        debug_assert!(node < nodes, "node id out of range");
        if nodes <= 1 {
            return Vec::new();
        }
        vec![(node + nodes - 1) % nodes]
    }

    fn reverse_lifeline(&self, node: usize, nodes: usize) -> Vec<usize> {
        if nodes <= 1 {
            return Vec::new();
        }
        vec![(node + 1) % nodes]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Require that every node can reach every other node over lifeline
    /// edges alone. A starving thief registers along these edges, so a node
    /// outside the reachable set of the work holder would never be fed.
    fn assert_connected(strategy: &dyn LifelineStrategy, nodes: usize) {
        for start in 0..nodes {
            let mut seen = vec![false; nodes];
            let mut stack = vec![start];
            seen[start] = true;
            while let Some(i) = stack.pop() {
                for peer in strategy.lifeline(i, nodes) {
                    if !seen[peer] {
                        seen[peer] = true;
                        stack.push(peer);
                    }
                }
            }
            assert!(
                seen.iter().all(|&s| s),
                "lifeline graph disconnected from node {start} at {nodes} nodes"
            );
        }
    }

    #[test]
    fn hypercube_neighbors_of_5_in_8() {
        let mut edges = HypercubeStrategy.lifeline(5, 8);
        edges.sort_unstable();
        // 5 = 0b101; one-bit flips: 4 (0b100), 7 (0b111), 1 (0b001).
        assert_eq!(edges, vec![1, 4, 7]);
    }

    #[test]
    fn hypercube_drops_out_of_range_neighbors() {
        // 5 = 0b101 in a 6-node cluster: flipping bit 1 gives 7, invalid.
        let mut edges = HypercubeStrategy.lifeline(5, 6);
        edges.sort_unstable();
        assert_eq!(edges, vec![1, 4]);
    }

    #[test]
    fn single_node_has_no_lifelines() {
        assert!(HypercubeStrategy.lifeline(0, 1).is_empty());
        assert!(RingStrategy.lifeline(0, 1).is_empty());
    }

    #[test]
    fn no_self_edges() {
        for nodes in 1..=17 {
            for i in 0..nodes {
                assert!(!HypercubeStrategy.lifeline(i, nodes).contains(&i));
                assert!(!RingStrategy.lifeline(i, nodes).contains(&i));
            }
        }
    }

    #[test]
    fn reverse_is_exact_inverse() {
        for nodes in 1..=17 {
            for v in 0..nodes {
                for strategy in [
                    &HypercubeStrategy as &dyn LifelineStrategy,
                    &RingStrategy as &dyn LifelineStrategy,
                ] {
                    let mut expected: Vec<usize> = (0..nodes)
                        .filter(|&t| strategy.lifeline(t, nodes).contains(&v))
                        .collect();
                    expected.sort_unstable();
                    let mut actual = strategy.reverse_lifeline(v, nodes);
                    actual.sort_unstable();
                    assert_eq!(actual, expected, "inverse mismatch v={v} n={nodes}");
                }
            }
        }
    }

    #[test]
    fn connected_for_small_clusters() {
        for nodes in 1..=33 {
            assert_connected(&HypercubeStrategy, nodes);
            assert_connected(&RingStrategy, nodes);
        }
    }
}
