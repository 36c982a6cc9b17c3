//! # Wire Protocol
//!
//! Newline-delimited JSON frames. Each frame is a `Frame { peer_id, type,
//! payload }` object; `type` and `payload` are adjacently tagged so the
//! payload's shape is determined by the message type, matching how
//! `FileTransferMessage` is modeled elsewhere in this codebase's network
//! layer.
//!
//! A frame MUST NOT contain an embedded newline; `serde_json` escapes
//! control characters in strings so this holds for any value we produce.
//! Receivers split strictly on raw `\n` bytes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::storage::manifest::FileManifest;

/// One newline-delimited wire frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Sender's self-reported identifier.
    pub peer_id: String,
    /// Message type and its payload.
    #[serde(flatten)]
    pub body: MessageBody,
}

/// Payload of a `handshake` message: the sender's locally shared manifests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakePayload {
    /// Manifests of files the sender currently shares.
    pub files: Vec<FileManifest>,
}

/// Payload shared by `chunk_request`, `chunk_not_found`, and `have`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRef {
    /// Digest of the file the chunk belongs to.
    pub file_hash: String,
    /// Zero-based chunk index.
    pub chunk_index: u32,
}

/// Payload of a `file_chunk` message: a verified chunk delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChunkPayload {
    /// Digest of the file this chunk belongs to.
    pub file_hash: String,
    /// Zero-based chunk index.
    pub chunk_index: u32,
    /// Base64-encoded chunk bytes.
    pub data: String,
    /// Hex-encoded SHA-256 of the (undecoded) chunk bytes.
    pub chunk_hash: String,
}

impl FileChunkPayload {
    /// Build a payload from raw chunk bytes, computing and base64-encoding
    /// as needed.
    pub fn from_bytes(file_hash: String, chunk_index: u32, bytes: &[u8]) -> Self {
        Self {
            file_hash,
            chunk_index,
            data: BASE64.encode(bytes),
            chunk_hash: hex::encode(Sha256::digest(bytes)),
        }
    }

    /// Decode the base64 payload into raw bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.data)
            .map_err(|e| Error::MalformedFrame(format!("invalid base64 chunk data: {}", e)))
    }
}

/// Empty payload for liveness messages.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmptyPayload {}

/// The tagged union of wire message bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MessageBody {
    /// Sender advertises its locally shared manifests.
    Handshake(HandshakePayload),
    /// Sender has newly made a file available.
    FileAnnounce(FileManifest),
    /// Sender wants a specific chunk.
    ChunkRequest(ChunkRef),
    /// Chunk delivery.
    FileChunk(FileChunkPayload),
    /// Responder lacks the requested chunk.
    ChunkNotFound(ChunkRef),
    /// Sender now holds this chunk.
    Have(ChunkRef),
    /// Liveness probe.
    Ping(EmptyPayload),
    /// Liveness reply.
    Pong(EmptyPayload),
}

impl Frame {
    /// Serialize this frame as a single newline-terminated JSON line.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = serde_json::to_vec(self)?;
        buf.push(b'\n');
        Ok(buf)
    }

    /// Parse a single line (without its trailing newline) as a frame.
    pub fn decode(line: &[u8]) -> Result<Self> {
        serde_json::from_slice(line)
            .map_err(|e| Error::MalformedFrame(format!("{}: {:?}", e, String::from_utf8_lossy(line))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::chunking::{chunk_count, DEFAULT_CHUNK_SIZE};

    fn sample_manifest() -> FileManifest {
        FileManifest {
            file_hash: "abc123".to_string(),
            filename: "hello.txt".to_string(),
            file_size: 12,
            chunk_size: DEFAULT_CHUNK_SIZE,
            total_chunks: chunk_count(12, DEFAULT_CHUNK_SIZE),
            piece_hashes: vec!["deadbeef".to_string()],
        }
    }

    #[test]
    fn handshake_round_trips_through_json() {
        let frame = Frame {
            peer_id: "alice".to_string(),
            body: MessageBody::Handshake(HandshakePayload {
                files: vec![sample_manifest()],
            }),
        };
        let encoded = frame.encode().unwrap();
        assert!(encoded.ends_with(b"\n"));
        let line = &encoded[..encoded.len() - 1];
        let decoded = Frame::decode(line).unwrap();
        match decoded.body {
            MessageBody::Handshake(p) => assert_eq!(p.files[0].file_hash, "abc123"),
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn encoded_frame_has_no_embedded_newline() {
        let frame = Frame {
            peer_id: "bob".to_string(),
            body: MessageBody::Ping(EmptyPayload {}),
        };
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn file_chunk_payload_round_trips_bytes() {
        let data = b"some chunk bytes";
        let payload = FileChunkPayload::from_bytes("abc123".to_string(), 0, data);
        assert_eq!(payload.decode().unwrap(), data);
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = Frame::decode(b"not json").unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let raw = br#"{"peer_id":"x","type":"unknown_type","payload":{}}"#;
        assert!(Frame::decode(raw).is_err());
    }
}
