//! # Node
//!
//! The public API surface consumed by the (externally supplied) CLI/REPL:
//! start/stop the listener, connect out to peers, share local files, and
//! kick off downloads.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::network::availability::AvailabilityIndex;
use crate::network::session::{self, SessionContext, SessionRegistry};
use crate::scheduler::{self, DownloadOutcome};
use crate::storage::chunk_store::ChunkStore;
use crate::storage::chunking::{chunk_count, compute_digests};
use crate::storage::manifest::{FileManifest, ManifestRegistry};
use crate::storage::metadata_cache;

/// A read-only snapshot of a node's state, for `status()`.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    /// This node's configured peer id.
    pub peer_id: String,
    /// Whether the listener is currently bound and accepting.
    pub listening: bool,
    /// Currently connected peer ids.
    pub connected_peers: Vec<String>,
    /// Digests with a download currently in flight.
    pub active_downloads: Vec<String>,
}

/// A decentralized chunk-transfer node: owns the shared manifest registry,
/// chunk store, and availability index, and drives the listener, outbound
/// connections, and download schedulers against them.
pub struct Node {
    ctx: Arc<SessionContext>,
    listener_handle: Mutex<Option<JoinHandle<()>>>,
    downloads: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Node {
    /// Construct a node from `config`. Does not bind a socket or scan the
    /// shared directory yet; call [`Node::start`] for that.
    pub fn new(config: NodeConfig) -> Self {
        let manifests = Arc::new(ManifestRegistry::new());
        let chunk_store = Arc::new(ChunkStore::new(manifests.clone(), config.download_dir.clone()));
        let ctx = Arc::new(SessionContext {
            local_peer_id: config.peer_id.clone(),
            manifests,
            chunk_store,
            availability: Arc::new(AvailabilityIndex::new()),
            sessions: Arc::new(SessionRegistry::new()),
            config,
            established_tx: tokio::sync::broadcast::channel(64).0,
        });
        Self {
            ctx,
            listener_handle: Mutex::new(None),
            downloads: Mutex::new(HashMap::new()),
        }
    }

    /// Scan the shared directory, load the metadata cache, and bind the
    /// listening socket. Idempotent: a second call while already running is
    /// a no-op.
    pub async fn start(&self) -> Result<std::net::SocketAddr> {
        if self.listener_handle.lock().is_some() {
            return Err(Error::InvalidOperation("node already started".into()));
        }

        for manifest in metadata_cache::load_all(&self.ctx.config.download_dir).await {
            let path = self.ctx.config.download_dir.join(&manifest.filename);
            if tokio::fs::metadata(&path).await.is_ok() {
                let _ = self.ctx.manifests.register_local(manifest, path);
            }
        }

        self.scan_shared_directory().await?;

        let listener = TcpListener::bind(&self.ctx.config.listen_addr)
            .await
            .map_err(|e| Error::Transport { peer: self.ctx.config.listen_addr.clone(), reason: e.to_string() })?;
        let bound_addr = listener.local_addr()?;

        let ctx = self.ctx.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        let session_ctx = ctx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = session::run_session(stream, session_ctx).await {
                                tracing::debug!(peer = %peer_addr, error = %e, "inbound session ended");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
        });
        *self.listener_handle.lock() = Some(handle);

        tracing::info!(addr = %bound_addr, "node started");
        Ok(bound_addr)
    }

    /// Stop accepting connections and cancel all running download
    /// schedulers. Sessions already established are not forcibly closed;
    /// they end naturally when their sockets close. In-progress `.part`
    /// files are left in place (abandoned, not deleted).
    pub async fn stop(&self) -> Result<()> {
        if let Some(handle) = self.listener_handle.lock().take() {
            handle.abort();
        }
        let downloads: Vec<_> = self.downloads.lock().drain().collect();
        for (_, handle) in downloads {
            handle.abort();
        }
        tracing::info!("node stopped");
        Ok(())
    }

    /// Open an outbound connection to `addr` and wait for the handshake to
    /// complete (or its timeout to elapse). Returns the remote peer id.
    pub async fn connect_peer(&self, addr: &str) -> Result<String> {
        session::connect_and_handshake(addr, self.ctx.clone()).await
    }

    /// Register `path` as a locally shared file and broadcast its manifest
    /// to every currently connected peer.
    pub async fn share_file(&self, path: impl Into<std::path::PathBuf>) -> Result<FileManifest> {
        let path = path.into();
        crate::storage::chunk_store::validate_share_path(&path).await?;

        let data = tokio::fs::read(&path).await?;
        let (file_hash, piece_hashes) = compute_digests(&data, self.ctx.config.chunk_size)?;
        let filename = path
            .file_name()
            .ok_or_else(|| Error::InvalidSharePath(path.display().to_string()))?
            .to_string_lossy()
            .into_owned();

        let manifest = FileManifest {
            file_hash: file_hash.clone(),
            filename,
            file_size: data.len() as u64,
            chunk_size: self.ctx.config.chunk_size,
            total_chunks: chunk_count(data.len() as u64, self.ctx.config.chunk_size),
            piece_hashes,
        };
        manifest.validate()?;

        self.ctx.manifests.register_local(manifest.clone(), path)?;
        metadata_cache::store(&self.ctx.config.download_dir, &manifest).await?;

        for entry in self.ctx.sessions.iter() {
            let frame = crate::network::protocol::Frame {
                peer_id: self.ctx.local_peer_id.clone(),
                body: crate::network::protocol::MessageBody::FileAnnounce(manifest.clone()),
            };
            let _ = entry.value().send(frame).await;
        }

        Ok(manifest)
    }

    /// Start (or join, if already running) a download scheduler for
    /// `digest`. Awaits the scheduler to completion, stall, or cancellation.
    pub async fn download_file(&self, digest: &str) -> Result<DownloadOutcome> {
        if self.ctx.manifests.get(digest).is_none() {
            return Err(Error::UnknownDigest(digest.to_string()));
        }
        self.ctx.chunk_store.begin_download(digest).await?;

        let ctx = self.ctx.clone();
        let digest_owned = digest.to_string();
        let digest_for_task = digest_owned.clone();
        let (result_tx, result_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            let outcome = scheduler::run_download(digest_for_task, ctx).await;
            let _ = result_tx.send(outcome);
        });
        self.downloads.lock().insert(digest_owned.clone(), handle);

        let outcome = result_rx
            .await
            .map_err(|_| Error::InvalidOperation("download cancelled".into()))?;
        self.downloads.lock().remove(&digest_owned);
        outcome
    }

    /// Manifests of files this node currently shares.
    pub fn list_shared(&self) -> Vec<FileManifest> {
        self.ctx.manifests.list_local()
    }

    /// Every manifest this node knows about, local or remote.
    pub fn list_available(&self) -> Vec<FileManifest> {
        self.ctx.manifests.list_all()
    }

    /// Snapshot of this node's current state.
    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            peer_id: self.ctx.local_peer_id.clone(),
            listening: self.listener_handle.lock().is_some(),
            connected_peers: self.ctx.availability.live_peers(),
            active_downloads: self.downloads.lock().keys().cloned().collect(),
        }
    }

    async fn scan_shared_directory(&self) -> Result<()> {
        let dir = &self.ctx.config.shared_dir;
        if tokio::fs::metadata(dir).await.is_err() {
            return Ok(());
        }
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if crate::storage::chunk_store::validate_share_path(&path).await.is_ok() {
                if let Err(e) = self.share_file(path.clone()).await {
                    tracing::warn!(path = %path.display(), error = %e, "failed to share file during scan");
                }
            }
        }
        Ok(())
    }
}
