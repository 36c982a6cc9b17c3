//! # Network Module
//!
//! The wire protocol, per-connection session state machine, and the peer
//! availability index built on top of it.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      PEER CONNECTION FLOW                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  1. TCP connect (outbound) or accept (inbound)                         │
//! │  2. Both sides send `handshake` immediately                            │
//! │  3. First inbound `handshake` attaches the peer to the availability    │
//! │     index and registers its advertised manifests                       │
//! │  4. Established: chunk_request/file_chunk/have/ping flow freely        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod availability;
pub mod protocol;
pub mod session;

pub use availability::AvailabilityIndex;
pub use protocol::{Frame, MessageBody};
pub use session::{SessionContext, SessionHandle, SessionRegistry, SessionState};
