//! # Metadata Cache
//!
//! Write-through, best-effort persistence of manifests to
//! `<download_dir>/.metadata/<digest>.json`, so a restarted node can recall
//! what it previously saw without re-announcing. Never authoritative: a
//! loaded manifest is re-validated exactly as a wire announcement would be,
//! and a load failure is logged and ignored rather than surfaced.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::storage::manifest::FileManifest;

/// Directory name for the cache, relative to the download directory.
const CACHE_DIR: &str = ".metadata";

fn cache_path(download_dir: &Path, digest: &str) -> PathBuf {
    download_dir.join(CACHE_DIR).join(format!("{}.json", digest))
}

/// Persist `manifest` to the cache. Best-effort: I/O failures are returned
/// to the caller to log, never panicked on.
pub async fn store(download_dir: &Path, manifest: &FileManifest) -> Result<()> {
    let dir = download_dir.join(CACHE_DIR);
    tokio::fs::create_dir_all(&dir).await?;
    let path = cache_path(download_dir, &manifest.file_hash);
    let json = serde_json::to_vec_pretty(manifest)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

/// Load every cached manifest under `download_dir`'s cache directory.
/// Entries that fail to parse or fail validation are skipped, not fatal.
pub async fn load_all(download_dir: &Path) -> Vec<FileManifest> {
    let dir = download_dir.join(CACHE_DIR);
    let mut out = Vec::new();
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(_) => return out,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(bytes) = tokio::fs::read(entry.path()).await else { continue };
        let Ok(manifest) = serde_json::from_slice::<FileManifest>(&bytes) else { continue };
        if manifest.validate().is_ok() {
            out.push(manifest);
        }
    }
    out
}
