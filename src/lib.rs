//! # Chunkswarm Core
//!
//! A decentralized, chunk-based file-sharing node: a BitTorrent-like wire
//! protocol, a content-addressed chunk store, and a peer availability index
//! driving a download scheduler.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       CHUNKSWARM CORE MODULES                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │  storage    │  │  network    │  │  scheduler  │  │     node     │   │
//! │  │             │  │             │  │             │  │              │   │
//! │  │ - chunking  │  │ - protocol  │  │ - polling   │  │ - public API │   │
//! │  │ - manifest  │  │ - session   │  │ - K=10      │  │ - listener   │   │
//! │  │ - chunk_io  │  │ - avail.    │  │   window    │  │ - shares     │   │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘  └──────┬───────┘   │
//! │         └────────────────┴────────────────┴────────────────┘           │
//! │                                   │                                     │
//! │                          error / config / time                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - crate-wide error type
//! - [`config`] - node configuration
//! - [`storage`] - chunking, manifests, chunk store, metadata cache
//! - [`network`] - wire protocol, peer sessions, availability index
//! - [`scheduler`] - the per-download polling loop
//! - [`node`] - the public node API
//! - [`time`] - wall-clock helpers
//!
//! ## Non-goals
//!
//! No DHT or tracker-based discovery, no transport encryption or peer
//! authentication, no NAT traversal, no rate limiting, and no resumption of
//! a download across process restarts.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod network;
pub mod node;
pub mod scheduler;
pub mod storage;
pub mod time;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use node::{Node, NodeStatus};
pub use scheduler::DownloadOutcome;
pub use storage::FileManifest;

/// Returns the version of this crate.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
