//! Snapshot persistence and incremental change detection.
//!
//! A snapshot is the per-collection `relative_path -> {mtime, size, hash}`
//! map persisted as N shard files, keyed by a consistent-hash ring so that
//! resizing the shard count relocates only a small fraction of paths.

pub mod change_detector;
pub mod checkpoint;
pub mod migrate;
pub mod ring;
pub mod sharded;

pub use change_detector::ChangeDetector;
pub use change_detector::ChangeSet;
pub use checkpoint::Checkpoint;
pub use checkpoint::CheckpointPhase;
pub use checkpoint::CheckpointStore;
pub use migrate::MigrationOutcome;
pub use migrate::SnapshotMigrator;
pub use ring::ConsistentHash;
pub use sharded::FileState;
pub use sharded::ShardedSnapshot;
