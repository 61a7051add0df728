//! Resumable progress checkpoints for long reindex runs.
//!
//! One JSON file per collection. A checkpoint older than 24 hours is
//! stale: `load` deletes it and reports absence, so an abandoned run can
//! never pin the file set of a long-dead scan.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;

/// Which phase the interrupted run was in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPhase {
    Indexing,
    Deleting,
}

/// Persisted progress of a reindex run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Relative paths already processed, in processing order.
    pub processed_files: Vec<String>,
    pub total_files: u64,
    pub timestamp: DateTime<Utc>,
    pub phase: CheckpointPhase,
}

impl Checkpoint {
    /// Progress percentage, clamped to [0, 100].
    pub fn progress_percent(&self) -> u32 {
        if self.total_files == 0 {
            return 0;
        }
        let pct = (self.processed_files.len() as f64 / self.total_files as f64) * 100.0;
        (pct.round() as i64).clamp(0, 100) as u32
    }
}

/// Hours after which a checkpoint is considered abandoned.
const STALE_AFTER_HOURS: i64 = 24;

/// On-disk checkpoint store for one collection.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// `<base>/<collection>.checkpoint.json`.
    pub fn new(base_dir: &Path, collection: &str) -> Self {
        Self {
            path: base_dir.join(format!("{collection}.checkpoint.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist current progress.
    pub fn save(
        &self,
        processed_files: &[String],
        total_files: u64,
        phase: CheckpointPhase,
    ) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let checkpoint = Checkpoint {
            processed_files: processed_files.to_vec(),
            total_files,
            timestamp: Utc::now(),
            phase,
        };
        fs::write(&self.path, serde_json::to_vec_pretty(&checkpoint)?)?;
        Ok(())
    }

    /// Load the checkpoint.
    ///
    /// Returns `None` for missing or corrupted files. A stale checkpoint
    /// is also `None`, and the file is removed on the way out.
    pub fn load(&self) -> Option<Checkpoint> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let checkpoint: Checkpoint = match serde_json::from_str(&raw) {
            Ok(checkpoint) => checkpoint,
            Err(error) => {
                tracing::warn!(path = %self.path.display(), error = %error, "corrupt checkpoint ignored");
                return None;
            }
        };

        if Utc::now() - checkpoint.timestamp > Duration::hours(STALE_AFTER_HOURS) {
            tracing::info!(path = %self.path.display(), "stale checkpoint deleted");
            let _ = fs::remove_file(&self.path);
            return None;
        }
        Some(checkpoint)
    }

    /// Remove the checkpoint file.
    pub fn delete(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Drop already-processed files from `current_files`, preserving order.
///
/// Files recorded in the checkpoint but deleted since are simply absent
/// from `current_files` and need no special handling.
pub fn filter_processed(
    current_files: &[PathBuf],
    checkpoint: &Checkpoint,
    root: &Path,
) -> Vec<PathBuf> {
    let processed: std::collections::HashSet<&str> = checkpoint
        .processed_files
        .iter()
        .map(String::as_str)
        .collect();

    current_files
        .iter()
        .filter(|path| {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            !processed.contains(rel.as_str())
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path(), "code_abc");

        store
            .save(
                &["a.ts".to_string(), "b.ts".to_string()],
                10,
                CheckpointPhase::Indexing,
            )
            .unwrap();

        let checkpoint = store.load().unwrap();
        assert_eq!(checkpoint.processed_files.len(), 2);
        assert_eq!(checkpoint.total_files, 10);
        assert_eq!(checkpoint.phase, CheckpointPhase::Indexing);
        assert_eq!(checkpoint.progress_percent(), 20);
    }

    #[test]
    fn missing_and_corrupt_files_load_as_none() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path(), "code_abc");
        assert!(store.load().is_none());

        fs::write(store.path(), b"not json").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn stale_checkpoint_is_deleted_on_load() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path(), "code_abc");

        let stale = Checkpoint {
            processed_files: vec!["a.ts".to_string()],
            total_files: 5,
            timestamp: Utc::now() - Duration::hours(25),
            phase: CheckpointPhase::Indexing,
        };
        fs::write(store.path(), serde_json::to_vec(&stale).unwrap()).unwrap();

        assert!(store.load().is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path(), "code_abc");
        store.delete().unwrap();
        store
            .save(&[], 1, CheckpointPhase::Deleting)
            .unwrap();
        store.delete().unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn filter_processed_preserves_order_and_tolerates_deletions() {
        let root = Path::new("/repo");
        let checkpoint = Checkpoint {
            processed_files: vec!["a.ts".to_string(), "gone.ts".to_string()],
            total_files: 4,
            timestamp: Utc::now(),
            phase: CheckpointPhase::Indexing,
        };

        let current = vec![
            PathBuf::from("/repo/a.ts"),
            PathBuf::from("/repo/b.ts"),
            PathBuf::from("/repo/c.ts"),
        ];
        let remaining = filter_processed(&current, &checkpoint, root);
        assert_eq!(
            remaining,
            vec![PathBuf::from("/repo/b.ts"), PathBuf::from("/repo/c.ts")]
        );
    }

    #[test]
    fn progress_percent_is_clamped() {
        let checkpoint = Checkpoint {
            processed_files: (0..12).map(|i| format!("{i}.ts")).collect(),
            total_files: 10,
            timestamp: Utc::now(),
            phase: CheckpointPhase::Indexing,
        };
        assert_eq!(checkpoint.progress_percent(), 100);
    }
}
