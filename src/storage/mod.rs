//! # Storage Module
//!
//! Everything that touches the filesystem: content-addressed chunking, the
//! manifest registry, and the chunk store that backs reads from shared
//! files and writes into in-progress downloads.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE LAYOUT                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  <shared_dir>/                  files offered to peers                 │
//! │  <download_dir>/.<name>.part    sparse in-progress download            │
//! │  <download_dir>/<name>          completed, verified download           │
//! │  <download_dir>/.metadata/      cached manifests (non-authoritative)   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod chunk_store;
pub mod chunking;
pub mod manifest;
pub mod metadata_cache;

pub use chunk_store::ChunkStore;
pub use chunking::DEFAULT_CHUNK_SIZE;
pub use manifest::{FileManifest, ManifestRegistry};
