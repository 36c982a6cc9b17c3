//! # Peer Session
//!
//! One session per TCP connection: frames outbound messages, drives the
//! handshake/established/closed state machine, and routes inbound messages
//! into the manifest registry, chunk store, and availability index.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::network::availability::AvailabilityIndex;
use crate::network::protocol::{
    ChunkRef, EmptyPayload, Frame, HandshakePayload, MessageBody,
};
use crate::storage::chunk_store::ChunkStore;
use crate::storage::chunking::verify_chunk_hash;
use crate::storage::manifest::ManifestRegistry;

/// Session lifecycle, per §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport attached, our handshake has been queued for send.
    Opened,
    /// Waiting for the peer's `handshake` frame.
    AwaitingHandshake,
    /// Handshake complete; processing all message types.
    Established,
    /// Transport lost or deliberately closed.
    Closed,
}

/// A lightweight, cloneable reference to a live session's outbound channel.
/// Stored in [`SessionRegistry`] so the availability index and scheduler can
/// address a specific peer without touching the socket directly.
#[derive(Clone)]
pub struct SessionHandle {
    outbound: mpsc::Sender<Frame>,
}

impl SessionHandle {
    /// Queue `frame` for this session's writer task. Fails silently into an
    /// error if the writer task has already exited.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| Error::PeerNotConnected("session writer closed".into()))
    }
}

/// Shared map of live sessions, keyed by remote peer id.
pub type SessionRegistry = DashMap<String, SessionHandle>;

/// Shared, cross-session state a running session needs: the manifest
/// registry, chunk store, availability index, and the registry of sibling
/// sessions (so a `file_chunk` response can be addressed to whichever
/// session the request arrived on, and so completed downloads can be
/// broadcast as `file_announce`).
pub struct SessionContext {
    /// This node's self-reported identifier.
    pub local_peer_id: String,
    pub manifests: Arc<ManifestRegistry>,
    pub chunk_store: Arc<ChunkStore>,
    pub availability: Arc<AvailabilityIndex>,
    pub sessions: Arc<SessionRegistry>,
    pub config: NodeConfig,
    /// Broadcasts the remote peer id each time a session reaches
    /// `Established`, so callers like `Node::connect_peer` can await
    /// handshake completion without blocking on the session's full
    /// lifetime.
    pub established_tx: tokio::sync::broadcast::Sender<String>,
}

/// Drive one peer connection end to end: send our handshake, read frames
/// until the handshake timeout or EOF, then process messages until the
/// connection closes. Always detaches from the availability index and
/// session registry on exit.
pub async fn run_session(stream: TcpStream, ctx: Arc<SessionContext>) -> Result<()> {
    stream.set_nodelay(true).ok();
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::channel::<Frame>(64);
    let handle = SessionHandle { outbound: tx.clone() };

    let writer = tokio::spawn(writer_loop(write_half, rx));

    let our_handshake = Frame {
        peer_id: ctx.local_peer_id.clone(),
        body: MessageBody::Handshake(HandshakePayload {
            files: ctx.manifests.list_local(),
        }),
    };
    tx.send(our_handshake)
        .await
        .map_err(|_| Error::Transport { peer: "unknown".into(), reason: "writer closed immediately".into() })?;

    let result = read_loop(read_half, &ctx, &tx, handle).await;

    drop(tx);
    let _ = writer.await;
    result
}

async fn read_loop(
    read_half: OwnedReadHalf,
    ctx: &Arc<SessionContext>,
    outbound: &mpsc::Sender<Frame>,
    handle: SessionHandle,
) -> Result<()> {
    let mut reader = BufReader::new(read_half);
    let mut state = SessionState::AwaitingHandshake;
    let mut remote_peer_id: Option<String> = None;

    let handshake_deadline = tokio::time::sleep(ctx.config.handshake_timeout);
    tokio::pin!(handshake_deadline);

    loop {
        let mut line = Vec::new();
        let read_result = if state == SessionState::AwaitingHandshake {
            tokio::select! {
                res = read_frame_line(&mut reader, &mut line, ctx.config.max_frame_bytes) => res,
                _ = &mut handshake_deadline => {
                    return Err(Error::HandshakeTimeout {
                        peer: remote_peer_id.unwrap_or_else(|| "unknown".to_string()),
                        elapsed_ms: ctx.config.handshake_timeout.as_millis() as u64,
                    });
                }
            }
        } else {
            read_frame_line(&mut reader, &mut line, ctx.config.max_frame_bytes).await
        };

        let Some(()) = read_result? else {
            break;
        };
        if line.is_empty() {
            continue;
        }

        let frame = match Frame::decode(&line) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                continue;
            }
        };

        match state {
            SessionState::AwaitingHandshake => {
                if let MessageBody::Handshake(payload) = &frame.body {
                    remote_peer_id = Some(frame.peer_id.clone());
                    ctx.sessions.insert(frame.peer_id.clone(), handle.clone());
                    ctx.availability.attach(&frame.peer_id);
                    for manifest in &payload.files {
                        match manifest.validate() {
                            Ok(()) => {
                                let _ = ctx.manifests.register_remote(manifest.clone());
                                ctx.availability.record_file(&frame.peer_id, &manifest.file_hash);
                            }
                            Err(e) => tracing::warn!(error = %e, "rejected manifest in handshake"),
                        }
                    }
                    state = SessionState::Established;
                    tracing::info!(peer = %frame.peer_id, "session established");
                    let _ = ctx.established_tx.send(frame.peer_id.clone());
                } else {
                    tracing::debug!("ignoring non-handshake frame before handshake completes");
                }
            }
            SessionState::Established => {
                let remote = remote_peer_id.as_deref().unwrap_or(&frame.peer_id);
                if let Err(e) = handle_established(ctx, remote, frame.body, outbound).await {
                    tracing::warn!(peer = %remote, error = %e, "error handling message");
                }
            }
            SessionState::Opened | SessionState::Closed => unreachable!("loop only runs in these two states"),
        }
    }

    if let Some(peer_id) = remote_peer_id {
        ctx.availability.detach(&peer_id);
        ctx.sessions.remove(&peer_id);
        tracing::info!(peer = %peer_id, "session closed");
    }
    Ok(())
}

/// Read one line (without its trailing `\n`) into `buf`. Returns `Ok(None)`
/// on clean EOF, `Ok(Some(()))` when a line was read, and an error if the
/// line exceeds `max_frame_bytes` or the socket errors.
async fn read_frame_line(
    reader: &mut BufReader<OwnedReadHalf>,
    buf: &mut Vec<u8>,
    max_frame_bytes: usize,
) -> Result<Option<()>> {
    buf.clear();
    let n = reader.read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.len() > max_frame_bytes {
        return Err(Error::MalformedFrame(format!(
            "frame of {} bytes exceeds limit of {}",
            buf.len(),
            max_frame_bytes
        )));
    }
    Ok(Some(()))
}

async fn handle_established(
    ctx: &Arc<SessionContext>,
    remote: &str,
    body: MessageBody,
    outbound: &mpsc::Sender<Frame>,
) -> Result<()> {
    match body {
        MessageBody::Handshake(payload) => {
            for manifest in payload.files {
                if manifest.validate().is_ok() {
                    ctx.availability.record_file(remote, &manifest.file_hash);
                    let _ = ctx.manifests.register_remote(manifest);
                }
            }
        }
        MessageBody::FileAnnounce(manifest) => {
            if manifest.validate().is_ok() {
                ctx.availability.record_file(remote, &manifest.file_hash);
                let _ = ctx.manifests.register_remote(manifest);
            }
        }
        MessageBody::ChunkRequest(req) => {
            let reply = match ctx.chunk_store.read_chunk(&req.file_hash, req.chunk_index).await {
                Ok(bytes) => {
                    let payload = crate::network::protocol::FileChunkPayload::from_bytes(
                        req.file_hash.clone(),
                        req.chunk_index,
                        &bytes,
                    );
                    MessageBody::FileChunk(payload)
                }
                Err(_) => MessageBody::ChunkNotFound(req),
            };
            send_local(ctx, outbound, reply).await?;
        }
        MessageBody::FileChunk(payload) => {
            let bytes = payload.decode()?;
            if !verify_chunk_hash(&bytes, &payload.chunk_hash) {
                return Err(Error::ChunkHashMismatch {
                    digest: payload.file_hash,
                    index: payload.chunk_index,
                });
            }
            let digest = payload.file_hash.clone();
            let index = payload.chunk_index;
            let complete = ctx.chunk_store.write_chunk(&digest, index, &bytes).await?;
            send_local(
                ctx,
                outbound,
                MessageBody::Have(ChunkRef { file_hash: digest.clone(), chunk_index: index }),
            )
            .await?;
            if complete {
                match ctx.chunk_store.finalize(&digest).await {
                    Ok(path) => tracing::info!(digest = %digest, path = %path.display(), "download complete"),
                    Err(e) => tracing::error!(digest = %digest, error = %e, "finalize failed"),
                }
            }
        }
        MessageBody::ChunkNotFound(_) => {
            // No action: the scheduler re-derives the missing set on its
            // next poll and will pick a different source if one exists.
        }
        MessageBody::Have(chunk) => {
            ctx.availability.record_chunk(remote, &chunk.file_hash, chunk.chunk_index);
        }
        MessageBody::Ping(_) => {
            send_local(ctx, outbound, MessageBody::Pong(EmptyPayload {})).await?;
        }
        MessageBody::Pong(_) => {}
    }
    Ok(())
}

async fn send_local(ctx: &Arc<SessionContext>, outbound: &mpsc::Sender<Frame>, body: MessageBody) -> Result<()> {
    let frame = Frame { peer_id: ctx.local_peer_id.clone(), body };
    outbound
        .send(frame)
        .await
        .map_err(|_| Error::Transport { peer: "self".into(), reason: "writer closed".into() })
}

async fn writer_loop(mut write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        let bytes = match frame.encode() {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode outbound frame");
                continue;
            }
        };
        if let Err(e) = write_half.write_all(&bytes).await {
            tracing::debug!(error = %e, "write failed, closing session");
            break;
        }
    }
}

/// Connect out to `addr`, spawn the session's full lifetime in the
/// background, and return once the handshake completes (or the handshake
/// timeout elapses). Used by `Node::connect_peer`.
pub async fn connect_and_handshake(addr: &str, ctx: Arc<SessionContext>) -> Result<String> {
    let stream = tokio::time::timeout(Duration::from_secs(10), TcpStream::connect(addr))
        .await
        .map_err(|_| Error::HandshakeTimeout { peer: addr.to_string(), elapsed_ms: 10_000 })?
        .map_err(|e| Error::Transport { peer: addr.to_string(), reason: e.to_string() })?;

    let mut established_rx = ctx.established_tx.subscribe();
    let timeout = ctx.config.handshake_timeout;
    let session_ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = run_session(stream, session_ctx).await {
            tracing::debug!(error = %e, "outbound session ended");
        }
    });

    match tokio::time::timeout(timeout, established_rx.recv()).await {
        Ok(Ok(peer_id)) => Ok(peer_id),
        _ => Err(Error::HandshakeTimeout {
            peer: addr.to_string(),
            elapsed_ms: timeout.as_millis() as u64,
        }),
    }
}
