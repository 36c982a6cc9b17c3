//! # Error Handling
//!
//! Error types for the chunk-transfer engine.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Protocol Errors   (100-199) - malformed or unexpected wire frames  │
//! │  ├── Integrity Errors  (200-299) - hash mismatches                     │
//! │  ├── Transport Errors  (300-399) - connection loss, I/O on the socket  │
//! │  ├── Resource Errors   (400-499) - missing files/chunks/downloads      │
//! │  ├── Timeout Errors    (500-599) - handshake and scheduler timeouts    │
//! │  ├── Caller Errors     (600-699) - bad API arguments                   │
//! │  └── Internal Errors   (900-999) - serialization, I/O, bugs           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the chunk-transfer engine.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Protocol Errors (100-199)
    // ========================================================================
    /// A wire frame could not be parsed as JSON, or did not match the
    /// expected message schema.
    #[error("malformed protocol frame: {0}")]
    MalformedFrame(String),

    /// A manifest received on the wire (or from disk) failed validation.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// A chunk size other than the one this node is configured for was
    /// observed on the wire.
    #[error("chunk size mismatch: expected {expected}, got {actual}")]
    ChunkSizeMismatch {
        /// This node's configured chunk size.
        expected: usize,
        /// The chunk size implied by the remote message.
        actual: usize,
    },

    // ========================================================================
    // Integrity Errors (200-299)
    // ========================================================================
    /// A chunk's computed hash did not match its manifest digest.
    #[error("chunk {index} of {digest} failed hash verification")]
    ChunkHashMismatch {
        /// File digest the chunk belongs to.
        digest: String,
        /// Chunk index within the file.
        index: u32,
    },

    /// The whole-file digest of a completed download did not match its
    /// manifest digest.
    #[error("file {digest} failed whole-file verification after download")]
    FileHashMismatch {
        /// Expected file digest.
        digest: String,
    },

    // ========================================================================
    // Transport Errors (300-399)
    // ========================================================================
    /// The underlying connection was closed or reset.
    #[error("transport error with peer {peer}: {reason}")]
    Transport {
        /// Remote peer identifier, if known at the time of failure.
        peer: String,
        /// Description of the failure.
        reason: String,
    },

    // ========================================================================
    // Resource Errors (400-499)
    // ========================================================================
    /// No manifest is registered for the given digest.
    #[error("unknown file digest: {0}")]
    UnknownDigest(String),

    /// A chunk read was requested but the backing file/chunk is unavailable.
    #[error("chunk {index} of {digest} not available locally")]
    ChunkNotFound {
        /// File digest.
        digest: String,
        /// Chunk index.
        index: u32,
    },

    /// No download is in progress for the given digest.
    #[error("no download in progress for {0}")]
    UnknownDownload(String),

    /// A local path supplied to `share_file` does not exist or is not a
    /// regular file.
    #[error("cannot share path: {0}")]
    InvalidSharePath(String),

    // ========================================================================
    // Timeout Errors (500-599)
    // ========================================================================
    /// A peer failed to complete the handshake within the configured window.
    #[error("handshake with {peer} timed out after {elapsed_ms}ms")]
    HandshakeTimeout {
        /// Remote peer address or identifier.
        peer: String,
        /// Elapsed time before giving up, in milliseconds.
        elapsed_ms: u64,
    },

    /// A download made no progress for enough consecutive poll cycles that
    /// the scheduler gave up.
    #[error("download of {0} stalled: no peers for remaining chunks")]
    DownloadStalled(String),

    // ========================================================================
    // Caller Errors (600-699)
    // ========================================================================
    /// The requested peer is not connected.
    #[error("peer not connected: {0}")]
    PeerNotConnected(String),

    /// The node was asked to do something it cannot do in its current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================
    /// Underlying filesystem/socket I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure outside of frame parsing (e.g. the
    /// metadata cache).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A spawned task panicked or was cancelled.
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Numeric error code, stable across versions, for logging/metrics.
    ///
    /// - 100-199: Protocol
    /// - 200-299: Integrity
    /// - 300-399: Transport
    /// - 400-499: Resource
    /// - 500-599: Timeout
    /// - 600-699: Caller
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            Error::MalformedFrame(_) => 100,
            Error::InvalidManifest(_) => 101,
            Error::ChunkSizeMismatch { .. } => 102,

            Error::ChunkHashMismatch { .. } => 200,
            Error::FileHashMismatch { .. } => 201,

            Error::Transport { .. } => 300,

            Error::UnknownDigest(_) => 400,
            Error::ChunkNotFound { .. } => 401,
            Error::UnknownDownload(_) => 402,
            Error::InvalidSharePath(_) => 403,

            Error::HandshakeTimeout { .. } => 500,
            Error::DownloadStalled(_) => 501,

            Error::PeerNotConnected(_) => 600,
            Error::InvalidOperation(_) => 601,

            Error::Io(_) => 900,
            Error::Serialization(_) => 901,
            Error::Join(_) => 902,
        }
    }

    /// Whether a retry (by the caller, or the scheduler) is likely to help.
    ///
    /// Integrity and protocol errors on a single chunk are recoverable by
    /// re-requesting; a stalled download or an unknown digest is not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ChunkHashMismatch { .. }
                | Error::ChunkNotFound { .. }
                | Error::Transport { .. }
                | Error::PeerNotConnected(_)
        )
    }
}
