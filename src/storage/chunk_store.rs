//! # Chunk Store
//!
//! Reads chunks out of locally shared files and writes chunks into
//! sparse, pre-allocated `.part` files for in-progress downloads, finalizing
//! a download once every chunk has been written and verified.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::storage::chunking::verify_chunk_hash;
use crate::storage::manifest::{FileManifest, ManifestRegistry};
use std::sync::Arc;

/// Tracks which chunk indices of an in-progress download have been written
/// and verified.
struct DownloadState {
    manifest: FileManifest,
    part_path: PathBuf,
    have: BTreeSet<u32>,
}

/// Reads/writes chunk-sized slices of shared and in-progress files.
///
/// Shares a [`ManifestRegistry`] with the rest of the node: `read_chunk`
/// resolves a local path through it, and a completed download registers
/// itself back into it.
pub struct ChunkStore {
    manifests: Arc<ManifestRegistry>,
    download_dir: PathBuf,
    downloads: Mutex<std::collections::HashMap<String, DownloadState>>,
}

impl ChunkStore {
    /// Create a chunk store rooted at `download_dir`, sharing `manifests`
    /// with the node's manifest registry.
    pub fn new(manifests: Arc<ManifestRegistry>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifests,
            download_dir: download_dir.into(),
            downloads: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Read chunk `index` of `digest` from its local backing file.
    ///
    /// Returns `Err(ChunkNotFound)` if the digest is unknown, has no local
    /// path, or the read comes up short (the caller asked for a chunk index
    /// beyond the file's actual length).
    pub async fn read_chunk(&self, digest: &str, index: u32) -> Result<Vec<u8>> {
        let manifest = self
            .manifests
            .get(digest)
            .ok_or_else(|| Error::UnknownDigest(digest.to_string()))?;
        let path = self
            .manifests
            .local_path(digest)
            .ok_or_else(|| Error::ChunkNotFound { digest: digest.to_string(), index })?;

        let offset = index as u64 * manifest.chunk_size as u64;
        let remaining = manifest.file_size.saturating_sub(offset);
        if remaining == 0 {
            return Err(Error::ChunkNotFound { digest: digest.to_string(), index });
        }
        let want = (manifest.chunk_size as u64).min(remaining) as usize;

        let mut file = File::open(&path)
            .await
            .map_err(|_| Error::ChunkNotFound { digest: digest.to_string(), index })?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; want];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Begin (or resume, idempotently) a download for a manifest already
    /// registered in the manifest registry. Pre-sizes the sparse `.part`
    /// file by writing a single zero byte at `file_size - 1`.
    pub async fn begin_download(&self, digest: &str) -> Result<()> {
        if self.downloads.lock().contains_key(digest) {
            return Ok(());
        }
        let manifest = self
            .manifests
            .get(digest)
            .ok_or_else(|| Error::UnknownDigest(digest.to_string()))?;

        tokio::fs::create_dir_all(&self.download_dir).await?;
        let part_path = self.download_dir.join(format!(".{}.part", manifest.filename));

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&part_path)
            .await?;
        preallocate(file, manifest.file_size).await?;

        self.downloads.lock().insert(
            digest.to_string(),
            DownloadState {
                manifest,
                part_path,
                have: BTreeSet::new(),
            },
        );
        Ok(())
    }

    /// Verify and write a received chunk into the in-progress download's
    /// `.part` file. Returns whether this write completed the download.
    pub async fn write_chunk(&self, digest: &str, index: u32, data: &[u8]) -> Result<bool> {
        let (expected_hash, chunk_size, part_path, total_chunks) = {
            let downloads = self.downloads.lock();
            let state = downloads
                .get(digest)
                .ok_or_else(|| Error::UnknownDownload(digest.to_string()))?;
            let expected = state
                .manifest
                .piece_hashes
                .get(index as usize)
                .ok_or(Error::InvalidManifest(format!(
                    "chunk index {} out of range for {}",
                    index, digest
                )))?
                .clone();
            (
                expected,
                state.manifest.chunk_size,
                state.part_path.clone(),
                state.manifest.total_chunks,
            )
        };

        if !verify_chunk_hash(data, &expected_hash) {
            return Err(Error::ChunkHashMismatch {
                digest: digest.to_string(),
                index,
            });
        }

        let mut file = OpenOptions::new().write(true).open(&part_path).await?;
        file.seek(std::io::SeekFrom::Start(index as u64 * chunk_size as u64))
            .await?;
        file.write_all(data).await?;
        file.flush().await?;

        let complete = {
            let mut downloads = self.downloads.lock();
            let state = downloads
                .get_mut(digest)
                .ok_or_else(|| Error::UnknownDownload(digest.to_string()))?;
            state.have.insert(index);
            state.have.len() as u32 == total_chunks
        };

        Ok(complete)
    }

    /// Ordered list of chunk indices not yet received for `digest`.
    ///
    /// For a download in progress, the indices not yet written and
    /// verified. For a known manifest with no in-progress download and no
    /// local copy (not yet started), the full `0..total_chunks` range.
    /// Empty when the digest has no registered manifest at all, or when it
    /// is already backed by a local file (shared, or a finished download).
    pub fn missing_chunks(&self, digest: &str) -> Vec<u32> {
        if let Some(state) = self.downloads.lock().get(digest) {
            return (0..state.manifest.total_chunks)
                .filter(|i| !state.have.contains(i))
                .collect();
        }
        match self.manifests.get(digest) {
            Some(manifest) if self.manifests.local_path(digest).is_none() => {
                (0..manifest.total_chunks).collect()
            }
            _ => Vec::new(),
        }
    }

    /// True once every chunk of `digest` has been written and verified.
    pub fn is_complete(&self, digest: &str) -> bool {
        let downloads = self.downloads.lock();
        match downloads.get(digest) {
            Some(state) => state.have.len() as u32 == state.manifest.total_chunks,
            None => false,
        }
    }

    /// Recompute the whole-file digest of a completed download's `.part`
    /// file and, on match, rename it into place and register it back into
    /// the manifest registry as a local file. On mismatch the `.part` file
    /// is left in place for inspection and `FileHashMismatch` is returned.
    pub async fn finalize(&self, digest: &str) -> Result<PathBuf> {
        let (manifest, part_path) = {
            let downloads = self.downloads.lock();
            let state = downloads
                .get(digest)
                .ok_or_else(|| Error::UnknownDownload(digest.to_string()))?;
            (state.manifest.clone(), state.part_path.clone())
        };

        let mut file = File::open(&part_path).await?;
        let mut buf = Vec::with_capacity(manifest.file_size as usize);
        file.read_to_end(&mut buf).await?;
        let actual = crate::storage::chunking::digest_hex(&buf);
        if actual != manifest.file_hash {
            return Err(Error::FileHashMismatch { digest: digest.to_string() });
        }

        let final_path = self.download_dir.join(&manifest.filename);
        tokio::fs::rename(&part_path, &final_path).await?;
        self.manifests.register_local(manifest, final_path.clone())?;
        self.downloads.lock().remove(digest);
        Ok(final_path)
    }
}

/// Grow `file` to `size` bytes without materializing the intervening
/// region on disk (a single trailing zero byte suffices on filesystems that
/// support sparse files).
async fn preallocate(mut file: File, size: u64) -> Result<()> {
    if size == 0 {
        return Ok(());
    }
    file.seek(std::io::SeekFrom::Start(size - 1)).await?;
    file.write_all(&[0u8]).await?;
    file.flush().await?;
    Ok(())
}

/// Resolve the path a shared directory scan should register for `path`,
/// rejecting anything that is not a regular, readable file.
pub async fn validate_share_path(path: &Path) -> Result<()> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|_| Error::InvalidSharePath(path.display().to_string()))?;
    if !meta.is_file() {
        return Err(Error::InvalidSharePath(path.display().to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::chunking::{chunk_count, compute_digests, DEFAULT_CHUNK_SIZE};
    use tempfile::TempDir;

    async fn manifest_for(data: &[u8], filename: &str) -> FileManifest {
        let (file_hash, piece_hashes) = compute_digests(data, DEFAULT_CHUNK_SIZE).unwrap();
        FileManifest {
            file_hash,
            filename: filename.to_string(),
            file_size: data.len() as u64,
            chunk_size: DEFAULT_CHUNK_SIZE,
            total_chunks: chunk_count(data.len() as u64, DEFAULT_CHUNK_SIZE),
            piece_hashes,
        }
    }

    #[tokio::test]
    async fn download_round_trip_single_chunk() {
        let tmp = TempDir::new().unwrap();
        let data = b"Hello, P2P!\n";
        let manifest = manifest_for(data, "hello.txt").await;
        let digest = manifest.file_hash.clone();

        let registry = Arc::new(ManifestRegistry::new());
        registry.register_remote(manifest).unwrap();

        let store = ChunkStore::new(registry.clone(), tmp.path());
        store.begin_download(&digest).await.unwrap();

        let complete = store.write_chunk(&digest, 0, data).await.unwrap();
        assert!(complete);
        assert!(store.is_complete(&digest));

        let final_path = store.finalize(&digest).await.unwrap();
        let bytes = tokio::fs::read(&final_path).await.unwrap();
        assert_eq!(bytes, data);
        assert_eq!(registry.local_path(&digest), Some(final_path));
    }

    #[tokio::test]
    async fn corrupt_chunk_rejected_and_progress_not_advanced() {
        let tmp = TempDir::new().unwrap();
        let data = vec![0x42u8; DEFAULT_CHUNK_SIZE * 2];
        let manifest = manifest_for(&data, "big.bin").await;
        let digest = manifest.file_hash.clone();

        let registry = Arc::new(ManifestRegistry::new());
        registry.register_remote(manifest).unwrap();
        let store = ChunkStore::new(registry, tmp.path());
        store.begin_download(&digest).await.unwrap();

        let mut corrupted = data[0..DEFAULT_CHUNK_SIZE].to_vec();
        corrupted[0] ^= 0xFF;
        let err = store.write_chunk(&digest, 0, &corrupted).await.unwrap_err();
        assert!(matches!(err, Error::ChunkHashMismatch { .. }));
        assert_eq!(store.missing_chunks(&digest), vec![0, 1]);
    }

    #[tokio::test]
    async fn missing_chunks_shrinks_as_chunks_arrive() {
        let tmp = TempDir::new().unwrap();
        let data = vec![0x11u8; DEFAULT_CHUNK_SIZE * 3];
        let manifest = manifest_for(&data, "three.bin").await;
        let digest = manifest.file_hash.clone();

        let registry = Arc::new(ManifestRegistry::new());
        registry.register_remote(manifest).unwrap();
        let store = ChunkStore::new(registry, tmp.path());
        store.begin_download(&digest).await.unwrap();

        assert_eq!(store.missing_chunks(&digest), vec![0, 1, 2]);
        store
            .write_chunk(&digest, 1, &data[DEFAULT_CHUNK_SIZE..DEFAULT_CHUNK_SIZE * 2])
            .await
            .unwrap();
        assert_eq!(store.missing_chunks(&digest), vec![0, 2]);
    }

    #[tokio::test]
    async fn read_chunk_unknown_digest_errors() {
        let tmp = TempDir::new().unwrap();
        let registry = Arc::new(ManifestRegistry::new());
        let store = ChunkStore::new(registry, tmp.path());
        let err = store.read_chunk("deadbeef", 0).await.unwrap_err();
        assert!(matches!(err, Error::UnknownDigest(_)));
    }

    #[tokio::test]
    async fn missing_chunks_unknown_digest_is_empty() {
        let tmp = TempDir::new().unwrap();
        let registry = Arc::new(ManifestRegistry::new());
        let store = ChunkStore::new(registry, tmp.path());
        assert!(store.missing_chunks("deadbeef").is_empty());
    }

    #[tokio::test]
    async fn missing_chunks_full_range_for_known_but_unstarted_download() {
        let tmp = TempDir::new().unwrap();
        let data = vec![0x99u8; DEFAULT_CHUNK_SIZE * 2];
        let manifest = manifest_for(&data, "unstarted.bin").await;
        let digest = manifest.file_hash.clone();

        let registry = Arc::new(ManifestRegistry::new());
        registry.register_remote(manifest).unwrap();
        let store = ChunkStore::new(registry, tmp.path());

        // No begin_download call yet.
        assert_eq!(store.missing_chunks(&digest), vec![0, 1]);
    }

    #[tokio::test]
    async fn missing_chunks_empty_after_finalize() {
        let tmp = TempDir::new().unwrap();
        let data = b"finalize me";
        let manifest = manifest_for(data, "done.bin").await;
        let digest = manifest.file_hash.clone();

        let registry = Arc::new(ManifestRegistry::new());
        registry.register_remote(manifest).unwrap();
        let store = ChunkStore::new(registry, tmp.path());
        store.begin_download(&digest).await.unwrap();
        store.write_chunk(&digest, 0, data).await.unwrap();
        store.finalize(&digest).await.unwrap();

        assert!(store.missing_chunks(&digest).is_empty());
    }
}
