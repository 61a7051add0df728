//! Chunk-level churn overlay pass.
//!
//! For every stored chunk, reads the line-restricted history
//! (`git log -L start,end:path`) and merges the derived signals into the
//! chunk's payload under distinct `chunk*` keys, so the file-level `git`
//! section is never clobbered. Runs fire-and-forget with a bounded number
//! of concurrent git subprocesses.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use futures::stream;

use super::git_log;
use super::stats::compute_chunk_overlay;
use crate::config::EnrichmentConfig;
use crate::store::PayloadOp;
use crate::store::VectorStore;

/// One stored chunk awaiting an overlay.
#[derive(Debug, Clone)]
pub struct ChunkRef {
    pub chunk_id: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// Absolute file path -> stored chunks of that file.
///
/// Keys are absolute so the pass can re-relativize against the resolved
/// repository root, which may sit above the indexed directory.
pub type ChunkMap = HashMap<String, Vec<ChunkRef>>;

/// Payload merges per flush.
const PAYLOAD_FLUSH_SIZE: usize = 100;

/// Compute and write overlays for every chunk in `chunk_map`.
///
/// Per-chunk git failures are skipped; the pass reports how many overlays
/// it actually applied.
pub async fn run_chunk_churn(
    store: Arc<dyn VectorStore>,
    collection: String,
    repo_root: PathBuf,
    chunk_map: ChunkMap,
    config: EnrichmentConfig,
) -> u64 {
    let timeout = Duration::from_millis(config.chunk_churn_timeout_ms);
    let max_age_months = config.chunk_churn_max_age_months;

    let jobs: Vec<(String, ChunkRef)> = chunk_map
        .into_iter()
        .map(|(path, chunks)| {
            let rel = std::path::Path::new(&path)
                .strip_prefix(&repo_root)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or(path);
            (rel, chunks)
        })
        .flat_map(|(path, chunks)| chunks.into_iter().map(move |c| (path.clone(), c)))
        .collect();
    let total = jobs.len();

    let overlays: Vec<PayloadOp> = stream::iter(jobs)
        .map(|(path, chunk)| {
            let repo_root = repo_root.clone();
            async move {
                let history = git_log::read_line_history(
                    &repo_root,
                    &path,
                    chunk.start_line,
                    chunk.end_line,
                    timeout,
                )
                .await;
                match history {
                    Ok(data) if !data.is_empty() => {
                        let range = chunk.end_line.saturating_sub(chunk.start_line) + 1;
                        let overlay =
                            compute_chunk_overlay(&data, range, max_age_months, Utc::now());
                        if overlay.chunk_commit_count == 0 {
                            return None;
                        }
                        Some(PayloadOp {
                            payload: overlay.to_payload_map(),
                            point_ids: vec![chunk.chunk_id],
                        })
                    }
                    Ok(_) => None,
                    Err(error) => {
                        tracing::debug!(
                            path = %path,
                            start = chunk.start_line,
                            end = chunk.end_line,
                            error = %error,
                            "chunk history read failed, overlay skipped"
                        );
                        None
                    }
                }
            }
        })
        .buffer_unordered(config.chunk_churn_concurrency.max(1))
        .filter_map(|overlay| async move { overlay })
        .collect()
        .await;

    let applied = overlays.len() as u64;
    for ops in overlays.chunks(PAYLOAD_FLUSH_SIZE) {
        if let Err(error) = store.batch_set_payload(&collection, ops.to_vec()).await {
            tracing::warn!(error = %error, "chunk overlay payload write failed");
        }
    }

    tracing::info!(
        collection = %collection,
        chunks = total,
        overlays = applied,
        "chunk churn overlay pass finished"
    );
    applied
}
