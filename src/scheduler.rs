//! # Download Scheduler
//!
//! One task per in-progress digest. Repeatedly re-derives the missing-chunk
//! set from the chunk store (ground truth — no per-request timers), issues
//! up to `K` outstanding `chunk_request`s per cycle, and sleeps at a cadence
//! that depends on whether any request could be issued at all.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::network::protocol::{ChunkRef, Frame, MessageBody};
use crate::network::session::SessionContext;

/// Outcome of a scheduler run, returned when the download leaves the
/// scheduling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Every chunk was received and the whole-file digest verified.
    Completed,
    /// No progress was made for enough consecutive cycles that every
    /// remaining chunk had exhausted its retry budget.
    Stalled,
}

/// Drive a single download to completion or a stall.
///
/// `digest` must already have a registered manifest and an in-progress
/// download (`ChunkStore::begin_download` already called).
pub async fn run_download(digest: String, ctx: Arc<SessionContext>) -> Result<DownloadOutcome> {
    let config = &ctx.config;
    // Cycles each chunk index has remained outstanding, counted whether or
    // not a source was available for it that cycle — a chunk nobody has
    // (an announcing peer that later disconnected, a manifest loaded from
    // the metadata cache with no live peer) must still age toward
    // exhaustion, not sit at zero forever.
    let mut age: HashMap<u32, u32> = HashMap::new();
    // Consecutive cycles in which the missing-chunk count failed to shrink,
    // tracked across loop iterations (not re-derived within one) so the
    // stall condition reflects sustained lack of progress per the N-cycle
    // rule rather than firing the instant every chunk happens to be
    // exhausted in the same iteration it became exhausted.
    let mut no_progress_cycles = 0u32;
    let mut last_missing_count: Option<usize> = None;

    loop {
        if ctx.chunk_store.is_complete(&digest) {
            return Ok(DownloadOutcome::Completed);
        }

        let missing = ctx.chunk_store.missing_chunks(&digest);
        if missing.is_empty() {
            // Can only happen if `begin_download` was never called for a
            // fully-present manifest; treat as already done.
            return Ok(DownloadOutcome::Completed);
        }

        match last_missing_count {
            Some(prev) if missing.len() < prev => no_progress_cycles = 0,
            Some(_) => no_progress_cycles += 1,
            None => {}
        }
        last_missing_count = Some(missing.len());

        for index in &missing {
            *age.entry(*index).or_insert(0) += 1;
        }

        let all_exhausted = missing
            .iter()
            .all(|i| age.get(i).copied().unwrap_or(0) >= config.max_chunk_retries);
        if all_exhausted && no_progress_cycles >= config.stall_cycles {
            return Err(Error::DownloadStalled(digest));
        }

        let candidates: Vec<u32> = missing
            .into_iter()
            .filter(|i| age.get(i).copied().unwrap_or(0) < config.max_chunk_retries)
            .take(config.scheduler_window)
            .collect();

        let mut issued = 0usize;
        for index in &candidates {
            let Some(peer_id) = ctx.availability.select_source(&digest, *index) else {
                continue;
            };
            let Some(handle) = ctx.sessions.get(&peer_id) else {
                continue;
            };
            let frame = Frame {
                peer_id: ctx.local_peer_id.clone(),
                body: MessageBody::ChunkRequest(ChunkRef {
                    file_hash: digest.clone(),
                    chunk_index: *index,
                }),
            };
            if handle.send(frame).await.is_ok() {
                issued += 1;
            }
        }

        if issued == 0 {
            tokio::time::sleep(config.poll_interval_idle).await;
        } else {
            tokio::time::sleep(config.poll_interval_active).await;
        }
    }
}
