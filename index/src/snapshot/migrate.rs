//! Migration from the legacy single-file snapshot format.
//!
//! Early versions persisted one JSON file per collection. The migrator
//! detects that layout, rewrites it into shards, and keeps a `.bak` copy
//! of the original. Running it on an already-sharded or absent snapshot
//! is a no-op.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use super::sharded::FileMap;
use super::sharded::FileState;
use super::sharded::ShardedSnapshot;
use crate::error::Result;

/// Serialized shape of one legacy entry.
#[derive(Debug, Deserialize)]
struct LegacyEntry {
    mtime: i64,
    size: u64,
    hash: String,
}

/// What the migration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Legacy file found and rewritten; carries the migrated entry count.
    Migrated { files: usize },
    /// Nothing to do: already sharded, or no snapshot at all.
    NotNeeded,
}

/// One-way legacy-to-sharded snapshot migration.
pub struct SnapshotMigrator {
    base_dir: PathBuf,
    collection: String,
}

impl SnapshotMigrator {
    pub fn new(base_dir: &Path, collection: &str) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            collection: collection.to_string(),
        }
    }

    /// Path of the legacy single-file snapshot.
    pub fn legacy_path(&self) -> PathBuf {
        self.base_dir
            .join(format!("{}.snapshot.json", self.collection))
    }

    /// Migrate if needed.
    pub async fn migrate(&self, target: &ShardedSnapshot) -> Result<MigrationOutcome> {
        let legacy = self.legacy_path();
        if target.exists() || !legacy.exists() {
            return Ok(MigrationOutcome::NotNeeded);
        }

        let raw = fs::read_to_string(&legacy)?;
        let entries: HashMap<String, LegacyEntry> = serde_json::from_str(&raw)?;

        let files: FileMap = entries
            .into_iter()
            .map(|(path, entry)| {
                (
                    path,
                    FileState {
                        mtime: entry.mtime,
                        size: entry.size,
                        hash: entry.hash,
                    },
                )
            })
            .collect();
        let count = files.len();

        target.save(&files).await?;

        let backup = legacy.with_extension("json.bak");
        fs::rename(&legacy, &backup)?;

        tracing::info!(
            collection = %self.collection,
            files = count,
            backup = %backup.display(),
            "migrated legacy snapshot to sharded layout"
        );
        Ok(MigrationOutcome::Migrated { files: count })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn write_legacy(dir: &Path, collection: &str) {
        let body = serde_json::json!({
            "src/a.ts": { "mtime": 100, "size": 10, "hash": "aa" },
            "src/b.ts": { "mtime": 200, "size": 20, "hash": "bb" },
        });
        fs::write(
            dir.join(format!("{collection}.snapshot.json")),
            body.to_string(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn migrates_legacy_file_and_keeps_backup() {
        let dir = TempDir::new().unwrap();
        write_legacy(dir.path(), "code_abc");

        let target = ShardedSnapshot::new(dir.path(), "code_abc", 4, 150);
        let migrator = SnapshotMigrator::new(dir.path(), "code_abc");

        let outcome = migrator.migrate(&target).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::Migrated { files: 2 });

        let loaded = target.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["src/a.ts"].mtime, 100);
        assert_eq!(loaded["src/b.ts"].hash, "bb");

        assert!(!migrator.legacy_path().exists());
        assert!(dir.path().join("code_abc.snapshot.json.bak").exists());
    }

    #[tokio::test]
    async fn noop_when_already_sharded() {
        let dir = TempDir::new().unwrap();
        let target = ShardedSnapshot::new(dir.path(), "code_abc", 4, 150);
        target.save(&FileMap::new()).await.unwrap();
        write_legacy(dir.path(), "code_abc");

        let migrator = SnapshotMigrator::new(dir.path(), "code_abc");
        let outcome = migrator.migrate(&target).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::NotNeeded);
        // The legacy file is left untouched.
        assert!(migrator.legacy_path().exists());
    }

    #[tokio::test]
    async fn noop_when_nothing_exists() {
        let dir = TempDir::new().unwrap();
        let target = ShardedSnapshot::new(dir.path(), "code_abc", 4, 150);
        let migrator = SnapshotMigrator::new(dir.path(), "code_abc");
        let outcome = migrator.migrate(&target).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::NotNeeded);
    }
}
