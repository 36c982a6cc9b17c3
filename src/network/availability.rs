//! # Availability Index
//!
//! Tracks which peers are known to hold which files and chunks, and answers
//! source-selection queries for the download scheduler.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

/// In-memory index of file/chunk availability across connected peers.
///
/// A peer entry exists here if and only if its session is live: `detach`
/// removes the peer from every set below.
#[derive(Default)]
pub struct AvailabilityIndex {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Peers that have advertised a given file (via handshake or
    /// file_announce).
    peer_files: HashMap<String, HashSet<String>>,
    /// Peers known to hold a specific chunk (via `have`).
    peer_chunks: HashMap<(String, u32), HashSet<String>>,
    /// Live peer ids, used to order source selection deterministically.
    live_peers: Vec<String>,
}

impl AvailabilityIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `peer_id` as live. A no-op if already attached.
    pub fn attach(&self, peer_id: &str) {
        let mut inner = self.inner.write();
        if !inner.live_peers.iter().any(|p| p == peer_id) {
            inner.live_peers.push(peer_id.to_string());
        }
    }

    /// Remove `peer_id` from the live set and every availability mapping.
    pub fn detach(&self, peer_id: &str) {
        let mut inner = self.inner.write();
        inner.live_peers.retain(|p| p != peer_id);
        for peers in inner.peer_files.values_mut() {
            peers.remove(peer_id);
        }
        for peers in inner.peer_chunks.values_mut() {
            peers.remove(peer_id);
        }
    }

    /// Record that `peer_id` advertises `digest` (implicitly, every chunk
    /// of it — source selection falls through to this set when no
    /// chunk-level entry exists).
    pub fn record_file(&self, peer_id: &str, digest: &str) {
        self.inner
            .write()
            .peer_files
            .entry(digest.to_string())
            .or_default()
            .insert(peer_id.to_string());
    }

    /// Record that `peer_id` holds chunk `index` of `digest`.
    pub fn record_chunk(&self, peer_id: &str, digest: &str, index: u32) {
        self.inner
            .write()
            .peer_chunks
            .entry((digest.to_string(), index))
            .or_default()
            .insert(peer_id.to_string());
    }

    /// Pick a source peer for `(digest, index)`: a chunk-level holder if
    /// known, otherwise any peer that advertised the whole file, otherwise
    /// `None`. Only live peers are ever returned.
    pub fn select_source(&self, digest: &str, index: u32) -> Option<String> {
        let inner = self.inner.read();

        if let Some(peers) = inner.peer_chunks.get(&(digest.to_string(), index)) {
            if let Some(found) = inner.live_peers.iter().find(|p| peers.contains(*p)) {
                return Some(found.clone());
            }
        }
        if let Some(peers) = inner.peer_files.get(digest) {
            if let Some(found) = inner.live_peers.iter().find(|p| peers.contains(*p)) {
                return Some(found.clone());
            }
        }
        None
    }

    /// Peers currently attached.
    pub fn live_peers(&self) -> Vec<String> {
        self.inner.read().live_peers.clone()
    }

    /// True if `peer_id` is attached.
    pub fn is_live(&self, peer_id: &str) -> bool {
        self.inner.read().live_peers.iter().any(|p| p == peer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_level_source_preferred_over_file_level() {
        let idx = AvailabilityIndex::new();
        idx.attach("alice");
        idx.attach("bob");
        idx.record_file("alice", "digest1");
        idx.record_chunk("bob", "digest1", 3);

        assert_eq!(idx.select_source("digest1", 3), Some("bob".to_string()));
        assert_eq!(idx.select_source("digest1", 0), Some("alice".to_string()));
    }

    #[test]
    fn detach_removes_from_all_maps() {
        let idx = AvailabilityIndex::new();
        idx.attach("alice");
        idx.record_file("alice", "digest1");
        idx.record_chunk("alice", "digest1", 0);

        idx.detach("alice");

        assert_eq!(idx.select_source("digest1", 0), None);
        assert!(!idx.is_live("alice"));
    }

    #[test]
    fn no_source_when_no_peer_knows_file() {
        let idx = AvailabilityIndex::new();
        assert_eq!(idx.select_source("unknown", 0), None);
    }

    #[test]
    fn detached_peer_is_never_returned_even_if_still_in_maps_momentarily() {
        let idx = AvailabilityIndex::new();
        idx.attach("alice");
        idx.attach("carol");
        idx.record_file("alice", "digest1");
        idx.record_file("carol", "digest1");
        idx.detach("alice");

        assert_eq!(idx.select_source("digest1", 0), Some("carol".to_string()));
    }
}
