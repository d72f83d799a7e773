//! Scheduler error taxonomy.
//!
//! Three fatal classes, mirroring the failure model of the engine:
//!
//! - `Setup`: node/worker-pool bootstrap failed before any work was
//!   submitted. No partial result exists.
//! - `Encoding`: a work or result fragment could not be serialized for
//!   transfer. The sender's fragment is merged back before the error is
//!   surfaced, so work is never lost — but a persistent encoding failure is
//!   a configuration error, not something to retry.
//! - `RemoteUnavailable`: a steal or lifeline target is unreachable. Node
//!   failure is not recovered; the run terminates with this error rather
//!   than silently excluding the node.
//!
//! Grain-size arithmetic overflow inside the tuner saturates and is never
//! surfaced. Nothing in the core retries silently except the bounded
//! steal-attempt budget, which is a protocol step, not error recovery.

use std::fmt;

/// Fatal scheduler error.
#[derive(Debug)]
pub enum SchedulerError {
    /// Bootstrap failure before any work ran.
    Setup(String),
    /// A fragment could not be encoded or decoded for transfer.
    Encoding {
        /// Node where the failure occurred.
        node: usize,
        /// Underlying codec detail.
        detail: String,
    },
    /// A remote node's inbox or reply channel is gone.
    RemoteUnavailable {
        /// The unreachable node.
        node: usize,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup(detail) => write!(f, "scheduler setup failed: {detail}"),
            Self::Encoding { node, detail } => {
                write!(f, "fragment codec failure at node {node}: {detail}")
            }
            Self::RemoteUnavailable { node } => {
                write!(f, "node {node} is unreachable")
            }
        }
    }
}

impl std::error::Error for SchedulerError {}
