//! Zone-aware cluster membership and partition placement.
//!
//! The crate keeps a versioned member directory, spreads partition replicas
//! across member groups, tracks quorum, and reconciles data when split
//! sub-clusters rejoin. It performs no I/O of its own; discovery and failure
//! detection arrive as callbacks.

#![warn(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo
)]
#![deny(clippy::unwrap_in_result, clippy::panic_in_result_fn)]

pub mod cluster;

pub use cluster::{ClusterCoordinator, ClusterError, GridConfig, GridSettings};
