//! Incremental change detection against the sharded snapshot.
//!
//! Stats every candidate file and compares against the previous snapshot:
//! a matching `(mtime, size)` within a 1-second mtime tolerance reuses the
//! stored hash (editors routinely touch mtime without changing content);
//! anything else is re-hashed with SHA-256 over the raw bytes, so a CRLF
//! to LF rewrite is always detected.

use std::path::Path;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use futures::StreamExt;
use futures::stream;
use sha2::Digest;
use sha2::Sha256;

use super::sharded::FileMap;
use super::sharded::FileState;
use super::sharded::ShardedSnapshot;
use crate::error::Result;

/// Concurrent hashing tasks during a scan.
const HASH_CONCURRENCY: usize = 16;

/// Editors touch mtime without content changes; within this window the
/// stored hash is trusted when the size also matches.
const MTIME_TOLERANCE_SECS: i64 = 1;

/// Result of a change scan.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Absolute paths not present in the snapshot.
    pub added: Vec<PathBuf>,
    /// Absolute paths whose content hash differs.
    pub modified: Vec<PathBuf>,
    /// Relative paths present in the snapshot but gone from the scan.
    pub deleted: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn total(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }
}

/// Diffs the current file set against the persisted snapshot.
pub struct ChangeDetector {
    root: PathBuf,
    snapshot: ShardedSnapshot,
}

impl ChangeDetector {
    pub fn new(root: &Path, snapshot: ShardedSnapshot) -> Self {
        Self {
            root: root.to_path_buf(),
            snapshot,
        }
    }

    /// Root-relative, forward-slashed form of a path.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Compare `current_files` against the snapshot.
    pub async fn detect_changes(&self, current_files: &[PathBuf]) -> Result<ChangeSet> {
        let previous = self.load_or_empty().await;
        let current = self.current_states(current_files, &previous).await;

        let mut changes = ChangeSet::default();
        let mut present: std::collections::HashSet<String> = std::collections::HashSet::new();
        for file in current_files {
            let rel = self.relative(file);
            present.insert(rel.clone());
            match (current.get(&rel), previous.get(&rel)) {
                (Some(now), Some(then)) => {
                    if now.hash != then.hash {
                        changes.modified.push(file.clone());
                    }
                }
                (Some(_), None) => changes.added.push(file.clone()),
                // Unreadable during the scan; skip rather than guess.
                (None, _) => {}
            }
        }
        // Deletion is judged against the scan list, not the hashed map, so
        // a file that merely failed to stat is not reported as deleted.
        for rel in previous.keys() {
            if !present.contains(rel) {
                changes.deleted.push(rel.clone());
            }
        }
        changes.deleted.sort();

        tracing::debug!(
            added = changes.added.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            "change detection complete"
        );
        Ok(changes)
    }

    /// Recompute states for `files` and atomically replace the snapshot.
    pub async fn update_snapshot(&self, files: &[PathBuf]) -> Result<()> {
        let previous = self.load_or_empty().await;
        let current = self.current_states(files, &previous).await;
        self.snapshot.save(&current).await
    }

    /// Remove the snapshot shards.
    pub async fn delete_snapshot(&self) -> Result<()> {
        self.snapshot.delete().await
    }

    /// Whether the snapshot exists at all.
    pub fn snapshot_exists(&self) -> bool {
        self.snapshot.exists()
    }

    /// Cheap poll: does anything differ from the snapshot?
    pub async fn needs_reindex(&self, current_files: &[PathBuf]) -> Result<bool> {
        Ok(!self.detect_changes(current_files).await?.is_empty())
    }

    async fn load_or_empty(&self) -> FileMap {
        match self.snapshot.load().await {
            Ok(Some(map)) => map,
            Ok(None) => FileMap::new(),
            Err(error) => {
                // Corrupt snapshots degrade to a full re-scan.
                tracing::warn!(error = %error, "snapshot unreadable, treating as absent");
                FileMap::new()
            }
        }
    }

    /// Stat and (re)hash the given files with bounded concurrency.
    async fn current_states(&self, files: &[PathBuf], previous: &FileMap) -> FileMap {
        let jobs: Vec<(String, PathBuf, Option<FileState>)> = files
            .iter()
            .map(|path| {
                let rel = self.relative(path);
                let prior = previous.get(&rel).cloned();
                (rel, path.clone(), prior)
            })
            .collect();

        let states: Vec<Option<(String, FileState)>> = stream::iter(jobs)
            .map(|(rel, path, prior)| async move {
                tokio::task::spawn_blocking(move || {
                    file_state(&path, prior.as_ref()).map(|state| (rel, state))
                })
                .await
                .ok()
                .flatten()
            })
            .buffer_unordered(HASH_CONCURRENCY)
            .collect()
            .await;

        states.into_iter().flatten().collect()
    }
}

/// Stat one file and reuse or recompute its hash.
fn file_state(path: &Path, prior: Option<&FileState>) -> Option<FileState> {
    let metadata = path.metadata().ok()?;
    let mtime = metadata
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let size = metadata.len();

    if let Some(prior) = prior
        && !should_rehash(prior, mtime, size)
    {
        return Some(FileState {
            mtime,
            size,
            hash: prior.hash.clone(),
        });
    }

    let bytes = std::fs::read(path).ok()?;
    Some(FileState {
        mtime,
        size,
        hash: hex::encode(Sha256::digest(&bytes)),
    })
}

/// The fast path requires a matching size, an mtime within tolerance, and
/// a stored hash to reuse.
fn should_rehash(stored: &FileState, mtime: i64, size: u64) -> bool {
    size != stored.size || (mtime - stored.mtime).abs() > MTIME_TOLERANCE_SECS || stored.hash.is_empty()
}
