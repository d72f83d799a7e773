//! Property-based soundness tests.
//!
//! Run with: `cargo test --test property`

mod bag_conservation;
mod lifeline_graphs;
