//! # Manifest Registry
//!
//! A [`FileManifest`] is the immutable descriptor of a chunked file: its
//! digest, filename, size, and the ordered per-chunk digests. The
//! [`ManifestRegistry`] is the key-value store over digest that both local
//! shares and peer announcements populate.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::chunking::{chunk_count, DEFAULT_CHUNK_SIZE};

/// Immutable descriptor of a chunked file, exchanged on the wire in
/// `handshake` and `file_announce` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    /// Hex-encoded SHA-256 of the whole file. Canonical key.
    pub file_hash: String,
    /// Display filename. Never used to resolve a filesystem path for
    /// writes — downloads always land under `download_dir` keyed by this
    /// basename.
    pub filename: String,
    /// Total file size in bytes.
    pub file_size: u64,
    /// Chunk size this manifest was split with.
    pub chunk_size: usize,
    /// `ceil(file_size / chunk_size)`.
    pub total_chunks: u32,
    /// Per-chunk hex-encoded SHA-256 digests, in order.
    pub piece_hashes: Vec<String>,
}

impl FileManifest {
    /// Validate internal consistency: chunk count, piece hash count, and
    /// fixed chunk size. Filenames containing a path separator are rejected
    /// since a peer-supplied manifest is never trusted for path
    /// construction.
    pub fn validate(&self) -> Result<()> {
        if self.filename.is_empty()
            || self.filename.contains('/')
            || self.filename.contains('\\')
        {
            return Err(Error::InvalidManifest(format!(
                "invalid filename: {:?}",
                self.filename
            )));
        }
        if self.chunk_size != DEFAULT_CHUNK_SIZE {
            return Err(Error::ChunkSizeMismatch {
                expected: DEFAULT_CHUNK_SIZE,
                actual: self.chunk_size,
            });
        }
        let expected_chunks = chunk_count(self.file_size, self.chunk_size);
        if expected_chunks != self.total_chunks {
            return Err(Error::InvalidManifest(format!(
                "total_chunks {} does not match expected {} for file_size {}",
                self.total_chunks, expected_chunks, self.file_size
            )));
        }
        if self.piece_hashes.len() != self.total_chunks as usize {
            return Err(Error::InvalidManifest(format!(
                "piece_hashes length {} does not match total_chunks {}",
                self.piece_hashes.len(),
                self.total_chunks
            )));
        }
        Ok(())
    }
}

/// A manifest plus, if the file is locally backed, its resolved path.
#[derive(Debug, Clone)]
struct Entry {
    manifest: FileManifest,
    local_path: Option<PathBuf>,
}

/// In-memory registry of known file manifests, keyed by digest.
///
/// Populated from local directory scans (with a path) and from peer
/// announcements (without one). A remote entry is promoted to a local one
/// once its download completes.
#[derive(Debug, Default)]
pub struct ManifestRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl ManifestRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or update) a manifest backed by a local file.
    pub fn register_local(&self, manifest: FileManifest, path: PathBuf) -> Result<()> {
        manifest.validate()?;
        let digest = manifest.file_hash.clone();
        self.entries.write().insert(
            digest,
            Entry {
                manifest,
                local_path: Some(path),
            },
        );
        Ok(())
    }

    /// Register a manifest announced by a peer. Rejected if invalid;
    /// ignored (not an error) if the digest is already known — a local
    /// record is never overwritten by a remote announcement, and a second
    /// remote announcement of the same digest is redundant.
    pub fn register_remote(&self, manifest: FileManifest) -> Result<()> {
        manifest.validate()?;
        let mut entries = self.entries.write();
        entries.entry(manifest.file_hash.clone()).or_insert(Entry {
            manifest,
            local_path: None,
        });
        Ok(())
    }

    /// Look up a manifest by digest.
    pub fn get(&self, digest: &str) -> Option<FileManifest> {
        self.entries.read().get(digest).map(|e| e.manifest.clone())
    }

    /// Resolved local path for a digest, if this node has the file on disk.
    pub fn local_path(&self, digest: &str) -> Option<PathBuf> {
        self.entries.read().get(digest).and_then(|e| e.local_path.clone())
    }

    /// Manifests of files this node currently shares (have a local path
    /// for).
    pub fn list_local(&self) -> Vec<FileManifest> {
        self.entries
            .read()
            .values()
            .filter(|e| e.local_path.is_some())
            .map(|e| e.manifest.clone())
            .collect()
    }

    /// All known manifests, local or remote.
    pub fn list_all(&self) -> Vec<FileManifest> {
        self.entries.read().values().map(|e| e.manifest.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest(file_hash: &str, size: u64) -> FileManifest {
        let total_chunks = chunk_count(size, DEFAULT_CHUNK_SIZE);
        FileManifest {
            file_hash: file_hash.to_string(),
            filename: "hello.txt".to_string(),
            file_size: size,
            chunk_size: DEFAULT_CHUNK_SIZE,
            total_chunks,
            piece_hashes: (0..total_chunks).map(|i| format!("hash{}", i)).collect(),
        }
    }

    #[test]
    fn rejects_path_separator_in_filename() {
        let mut manifest = sample_manifest("abc", 12);
        manifest.filename = "../etc/passwd".to_string();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn rejects_mismatched_chunk_size() {
        let mut manifest = sample_manifest("abc", 12);
        manifest.chunk_size = 1024;
        assert!(matches!(
            manifest.validate(),
            Err(Error::ChunkSizeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_mismatched_piece_hash_count() {
        let mut manifest = sample_manifest("abc", DEFAULT_CHUNK_SIZE as u64 * 2);
        manifest.piece_hashes.pop();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn remote_registration_does_not_override_local() {
        let registry = ManifestRegistry::new();
        let manifest = sample_manifest("digest1", 12);
        registry
            .register_local(manifest.clone(), PathBuf::from("/shared/hello.txt"))
            .unwrap();

        let mut remote = manifest.clone();
        remote.filename = "renamed.txt".to_string();
        registry.register_remote(remote).unwrap();

        assert_eq!(registry.get("digest1").unwrap().filename, "hello.txt");
        assert!(registry.local_path("digest1").is_some());
    }

    #[test]
    fn list_local_excludes_remote_only_entries() {
        let registry = ManifestRegistry::new();
        registry
            .register_local(sample_manifest("local1", 12), PathBuf::from("/a"))
            .unwrap();
        registry.register_remote(sample_manifest("remote1", 12)).unwrap();

        let local = registry.list_local();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].file_hash, "local1");
        assert_eq!(registry.list_all().len(), 2);
    }
}
