//! End-to-end scenarios driving whole [`Node`]s over real loopback TCP
//! connections, complementing the unit-level tests inside each module.

use std::time::Duration;

use chunkswarm_core::{DownloadOutcome, Error, Node, NodeConfig};
use tempfile::TempDir;

fn node_config(shared: &std::path::Path, downloads: &std::path::Path, peer_id: &str) -> NodeConfig {
    NodeConfig {
        peer_id: peer_id.to_string(),
        listen_addr: "127.0.0.1:0".to_string(),
        shared_dir: shared.to_path_buf(),
        download_dir: downloads.to_path_buf(),
        handshake_timeout: Duration::from_secs(2),
        poll_interval_active: Duration::from_millis(20),
        poll_interval_idle: Duration::from_millis(50),
        ..NodeConfig::default()
    }
}

#[tokio::test]
async fn multi_chunk_file_transfers_correctly() {
    let shared_a = TempDir::new().unwrap();
    let downloads_a = TempDir::new().unwrap();
    let shared_b = TempDir::new().unwrap();
    let downloads_b = TempDir::new().unwrap();

    // Three chunks at the default 256 KiB chunk size, the last one partial.
    let mut data = vec![0u8; 256 * 1024 * 2 + 37];
    for (i, b) in data.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    tokio::fs::write(shared_a.path().join("big.bin"), &data).await.unwrap();

    let node_a = Node::new(node_config(shared_a.path(), downloads_a.path(), "a"));
    let addr_a = node_a.start().await.unwrap();

    let node_b = Node::new(node_config(shared_b.path(), downloads_b.path(), "b"));
    node_b.start().await.unwrap();
    node_b.connect_peer(&addr_a.to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let manifest = node_b.list_available().into_iter().next().unwrap();
    assert_eq!(manifest.total_chunks, 3);

    let outcome = node_b.download_file(&manifest.file_hash).await.unwrap();
    assert_eq!(outcome, DownloadOutcome::Completed);

    let downloaded = tokio::fs::read(downloads_b.path().join("big.bin")).await.unwrap();
    assert_eq!(downloaded, data);
}

#[tokio::test]
async fn download_recovers_after_source_peer_disconnects() {
    use chunkswarm_core::network::session::{self, SessionContext, SessionRegistry};
    use chunkswarm_core::network::AvailabilityIndex;
    use chunkswarm_core::storage::chunk_store::ChunkStore;
    use chunkswarm_core::storage::chunking::compute_digests;
    use chunkswarm_core::storage::manifest::{FileManifest, ManifestRegistry};
    use std::sync::Arc;

    let data = vec![0x7Au8; 256 * 1024 + 512];
    let (file_hash, piece_hashes) = compute_digests(&data, 256 * 1024).unwrap();
    let manifest = FileManifest {
        file_hash: file_hash.clone(),
        filename: "shared.bin".to_string(),
        file_size: data.len() as u64,
        chunk_size: 256 * 1024,
        total_chunks: 2,
        piece_hashes,
    };

    // Two source directories, both holding the same file under the same
    // name; each becomes the backing store for one upstream session.
    let source_a = TempDir::new().unwrap();
    let source_c = TempDir::new().unwrap();
    tokio::fs::write(source_a.path().join("shared.bin"), &data).await.unwrap();
    tokio::fs::write(source_c.path().join("shared.bin"), &data).await.unwrap();

    let downloads_b = TempDir::new().unwrap();
    let manifests_b = Arc::new(ManifestRegistry::new());
    manifests_b.register_remote(manifest.clone()).unwrap();
    let ctx_b = Arc::new(SessionContext {
        local_peer_id: "b".to_string(),
        manifests: manifests_b.clone(),
        chunk_store: Arc::new(ChunkStore::new(manifests_b, downloads_b.path())),
        availability: Arc::new(AvailabilityIndex::new()),
        sessions: Arc::new(SessionRegistry::new()),
        config: node_config(downloads_b.path(), downloads_b.path(), "b"),
        established_tx: tokio::sync::broadcast::channel(16).0,
    });

    async fn spawn_source(dir: &std::path::Path, peer_id: &str, manifest: &FileManifest) -> std::net::SocketAddr {
        let manifests = Arc::new(ManifestRegistry::new());
        manifests.register_local(manifest.clone(), dir.join(&manifest.filename)).unwrap();
        let ctx = Arc::new(SessionContext {
            local_peer_id: peer_id.to_string(),
            manifests: manifests.clone(),
            chunk_store: Arc::new(ChunkStore::new(manifests, dir.to_path_buf())),
            availability: Arc::new(AvailabilityIndex::new()),
            sessions: Arc::new(SessionRegistry::new()),
            config: node_config(dir, dir, peer_id),
            established_tx: tokio::sync::broadcast::channel(16).0,
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                let _ = session::run_session(stream, ctx).await;
            }
        });
        addr
    }

    let addr_a = spawn_source(source_a.path(), "a", &manifest).await;
    let addr_c = spawn_source(source_c.path(), "c", &manifest).await;

    session::connect_and_handshake(&addr_a.to_string(), ctx_b.clone()).await.unwrap();
    let peer_c = session::connect_and_handshake(&addr_c.to_string(), ctx_b.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Drop "a" out from under the download: detach it from the availability
    // index exactly as read_loop would on socket close, without touching c.
    ctx_b.availability.detach("a");
    ctx_b.sessions.remove("a");
    assert_eq!(peer_c, "c");

    ctx_b.chunk_store.begin_download(&file_hash).await.unwrap();
    let outcome = chunkswarm_core::scheduler::run_download(file_hash.clone(), ctx_b.clone())
        .await
        .unwrap();
    assert_eq!(outcome, DownloadOutcome::Completed);

    let downloaded = tokio::fs::read(downloads_b.path().join("shared.bin")).await.unwrap();
    assert_eq!(downloaded, data);
}

/// A hand-rolled "peer" that speaks just enough of the wire protocol to
/// announce one file and serve a single corrupted `file_chunk` the first
/// time a chunk is requested, then the genuine bytes on every request after
/// that — modeling a transient corruption that a real downloader retries
/// past, per the scheduler's no-timer, re-derive-and-resend design.
async fn run_flaky_peer(
    stream: tokio::net::TcpStream,
    manifest: chunkswarm_core::storage::manifest::FileManifest,
    original_data: Vec<u8>,
) {
    use chunkswarm_core::network::protocol::{Frame, HandshakePayload, MessageBody};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let hello = Frame {
        peer_id: "flaky".to_string(),
        body: MessageBody::Handshake(HandshakePayload { files: vec![manifest] }),
    };
    write_half.write_all(&hello.encode().unwrap()).await.unwrap();

    let mut served_bad = std::collections::HashSet::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await.unwrap();
        if n == 0 {
            break;
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        let Ok(frame) = Frame::decode(&line) else { continue };
        if let MessageBody::ChunkRequest(req) = frame.body {
            let bytes = if served_bad.insert(req.chunk_index) {
                let mut corrupted = original_data.clone();
                corrupted[0] ^= 0xFF;
                corrupted
            } else {
                original_data.clone()
            };
            let payload = chunkswarm_core::network::protocol::FileChunkPayload::from_bytes(
                req.file_hash.clone(),
                req.chunk_index,
                &bytes,
            );
            let reply = Frame {
                peer_id: "flaky".to_string(),
                body: MessageBody::FileChunk(payload),
            };
            if write_half.write_all(&reply.encode().unwrap()).await.is_err() {
                break;
            }
        }
    }
}

#[tokio::test]
async fn corrupted_chunk_is_rejected_then_recovered_on_retry() {
    use chunkswarm_core::storage::chunking::{chunk_count, compute_digests, DEFAULT_CHUNK_SIZE};
    use chunkswarm_core::storage::manifest::FileManifest;

    let shared = TempDir::new().unwrap();
    let downloads_b = TempDir::new().unwrap();

    let data = b"retry me once the first delivery arrives corrupted".to_vec();
    let (file_hash, piece_hashes) = compute_digests(&data, DEFAULT_CHUNK_SIZE).unwrap();
    let manifest = FileManifest {
        file_hash: file_hash.clone(),
        filename: "flaky.bin".to_string(),
        file_size: data.len() as u64,
        chunk_size: DEFAULT_CHUNK_SIZE,
        total_chunks: chunk_count(data.len() as u64, DEFAULT_CHUNK_SIZE),
        piece_hashes,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let peer_manifest = manifest.clone();
    let peer_data = data.clone();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            run_flaky_peer(stream, peer_manifest, peer_data).await;
        }
    });

    let node_b = Node::new(node_config(shared.path(), downloads_b.path(), "b"));
    node_b.start().await.unwrap();
    node_b.connect_peer(&addr.to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let outcome = node_b.download_file(&file_hash).await.unwrap();
    assert_eq!(outcome, DownloadOutcome::Completed);

    let downloaded = tokio::fs::read(downloads_b.path().join("flaky.bin")).await.unwrap();
    assert_eq!(downloaded, data);
}

#[tokio::test]
async fn handshake_timeout_surfaces_through_node_connect_peer() {
    let shared = TempDir::new().unwrap();
    let downloads = TempDir::new().unwrap();
    let mut config = node_config(shared.path(), downloads.path(), "solo");
    config.handshake_timeout = Duration::from_millis(150);
    let node = Node::new(config);
    node.start().await.unwrap();

    // A bare listener that accepts but never speaks the protocol.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let silent = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let result = node.connect_peer(&addr.to_string()).await;
    assert!(matches!(result, Err(Error::HandshakeTimeout { .. })));
    silent.abort();
}

#[tokio::test]
async fn downloading_unknown_digest_fails_without_network_activity() {
    let shared = TempDir::new().unwrap();
    let downloads = TempDir::new().unwrap();
    let node = Node::new(node_config(shared.path(), downloads.path(), "solo"));
    node.start().await.unwrap();

    let result = node.download_file("0000000000000000000000000000000000000000000000000000000000000000").await;
    assert!(matches!(result, Err(Error::UnknownDigest(_))));
    assert!(node.status().active_downloads.is_empty());
}
