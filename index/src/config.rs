//! Configuration for the indexing core.
//!
//! Plain structs with serde defaults. `IndexConfig::from_env()` layers the
//! process environment on top of the defaults; tests construct configs
//! directly so nothing here reads globals at use time.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::IndexErr;
use crate::error::Result;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexConfig {
    /// Directory for snapshots and checkpoints.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// File feeding and chunking limits.
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Embed/upsert/delete pipeline tuning.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Git-history enrichment tuning.
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Snapshot sharding.
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            indexing: IndexingConfig::default(),
            pipeline: PipelineConfig::default(),
            enrichment: EnrichmentConfig::default(),
            snapshot: SnapshotConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tea-rags-mcp")
}

impl IndexConfig {
    /// Defaults with environment-variable overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_usize("FILE_PROCESSING_CONCURRENCY") {
            config.indexing.file_concurrency = n;
        }
        if let Some(n) = env_usize("CHUNKER_POOL_SIZE") {
            config.indexing.chunker_pool_size = n;
        }
        if let Some(n) = env_usize("GIT_CHUNK_CONCURRENCY") {
            config.enrichment.chunk_churn_concurrency = n;
        }
        if let Some(n) = env_usize("GIT_CHUNK_MAX_AGE_MONTHS") {
            config.enrichment.chunk_churn_max_age_months = n as u32;
        }
        if let Ok(v) = std::env::var("GIT_CHUNK_ENABLED") {
            config.enrichment.chunk_churn_enabled = v != "false";
        }
        if let Some(n) = env_usize("GIT_BACKFILL_TIMEOUT_MS") {
            config.enrichment.backfill_timeout_ms = n as u64;
        }
        if std::env::var("DEBUG").is_ok_and(|v| !v.is_empty() && v != "false") {
            config.indexing.debug = true;
        }

        config
    }

    /// Directory holding snapshot shards and checkpoints.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    /// Reject values that would cause division by zero or stalled queues.
    pub fn validate(&self) -> Result<()> {
        self.indexing.validate()?;
        self.pipeline.validate()?;
        self.snapshot.validate()?;
        Ok(())
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse().ok()
}

/// File feeding and chunking limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexingConfig {
    /// Concurrent file reads/chunkings in the feeder.
    #[serde(default = "default_file_concurrency")]
    pub file_concurrency: usize,

    /// Size of the external chunker's worker pool.
    #[serde(default = "default_chunker_pool_size")]
    pub chunker_pool_size: usize,

    /// Per-file chunk cap; files beyond it are truncated.
    #[serde(default = "default_max_chunks_per_file")]
    pub max_chunks_per_file: usize,

    /// Run-wide chunk cap; feeding stops once it is reached.
    #[serde(default = "default_max_total_chunks")]
    pub max_total_chunks: usize,

    /// Skip files larger than this.
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,

    /// Extra verbosity in feeder logging.
    #[serde(default)]
    pub debug: bool,
}

fn default_file_concurrency() -> usize {
    50
}
fn default_chunker_pool_size() -> usize {
    4
}
fn default_max_chunks_per_file() -> usize {
    1_000
}
fn default_max_total_chunks() -> usize {
    450_000
}
fn default_max_file_size_bytes() -> u64 {
    1024 * 1024
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            file_concurrency: default_file_concurrency(),
            chunker_pool_size: default_chunker_pool_size(),
            max_chunks_per_file: default_max_chunks_per_file(),
            max_total_chunks: default_max_total_chunks(),
            max_file_size_bytes: default_max_file_size_bytes(),
            debug: false,
        }
    }
}

impl IndexingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.file_concurrency == 0 {
            return Err(IndexErr::ConfigError {
                field: "indexing.file_concurrency".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        if self.max_chunks_per_file == 0 || self.max_total_chunks == 0 {
            return Err(IndexErr::ConfigError {
                field: "indexing.max_chunks".to_string(),
                cause: "chunk caps must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Embed/upsert/delete pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Chunks per embedding batch.
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,

    /// Flush a partial embedding batch after this long.
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,

    /// Queue depth above which the feeder is backpressured.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Concurrent embed+upsert batch handlers.
    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: usize,

    /// Paths per delete batch. Deletes are cheap server-side, so the
    /// batches are much wider than embedding batches.
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,

    /// Concurrent delete batch handlers.
    #[serde(default = "default_delete_concurrency")]
    pub delete_concurrency: usize,

    /// Retries per failed batch before it is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Backoff ceiling.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Also generate sparse vectors and upsert both (hybrid search).
    #[serde(default)]
    pub hybrid: bool,
}

fn default_embed_batch_size() -> usize {
    100
}
fn default_flush_timeout_ms() -> u64 {
    1_000
}
fn default_max_queue_size() -> usize {
    1_000
}
fn default_embed_concurrency() -> usize {
    3
}
fn default_delete_batch_size() -> usize {
    500
}
fn default_delete_concurrency() -> usize {
    8
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    200
}
fn default_retry_max_delay_ms() -> u64 {
    5_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            embed_batch_size: default_embed_batch_size(),
            flush_timeout_ms: default_flush_timeout_ms(),
            max_queue_size: default_max_queue_size(),
            embed_concurrency: default_embed_concurrency(),
            delete_batch_size: default_delete_batch_size(),
            delete_concurrency: default_delete_concurrency(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            hybrid: false,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("pipeline.embed_batch_size", self.embed_batch_size),
            ("pipeline.max_queue_size", self.max_queue_size),
            ("pipeline.embed_concurrency", self.embed_concurrency),
            ("pipeline.delete_batch_size", self.delete_batch_size),
            ("pipeline.delete_concurrency", self.delete_concurrency),
        ] {
            if value == 0 {
                return Err(IndexErr::ConfigError {
                    field: field.to_string(),
                    cause: "must be positive".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Git-history enrichment tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentConfig {
    /// Months of history read by the prefetch pass.
    #[serde(default = "default_history_months")]
    pub history_months: u32,

    /// Concurrent `git log -L` subprocesses for chunk churn.
    #[serde(default = "default_chunk_churn_concurrency")]
    pub chunk_churn_concurrency: usize,

    /// Skip chunks older than this in the overlay pass.
    #[serde(default = "default_chunk_churn_max_age_months")]
    pub chunk_churn_max_age_months: u32,

    /// Whether the chunk-level overlay pass runs at all.
    #[serde(default = "default_true")]
    pub chunk_churn_enabled: bool,

    /// Timeout for the main prefetch `git log` read.
    #[serde(default = "default_git_log_timeout_ms")]
    pub git_log_timeout_ms: u64,

    /// Timeout for the backfill `git log` over missed paths.
    #[serde(default = "default_backfill_timeout_ms")]
    pub backfill_timeout_ms: u64,

    /// Timeout for each chunk-churn `git log -L` call.
    #[serde(default = "default_chunk_churn_timeout_ms")]
    pub chunk_churn_timeout_ms: u64,
}

fn default_history_months() -> u32 {
    12
}
fn default_chunk_churn_concurrency() -> usize {
    10
}
fn default_chunk_churn_max_age_months() -> u32 {
    6
}
fn default_true() -> bool {
    true
}
fn default_git_log_timeout_ms() -> u64 {
    120_000
}
fn default_backfill_timeout_ms() -> u64 {
    30_000
}
fn default_chunk_churn_timeout_ms() -> u64 {
    10_000
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            history_months: default_history_months(),
            chunk_churn_concurrency: default_chunk_churn_concurrency(),
            chunk_churn_max_age_months: default_chunk_churn_max_age_months(),
            chunk_churn_enabled: true,
            git_log_timeout_ms: default_git_log_timeout_ms(),
            backfill_timeout_ms: default_backfill_timeout_ms(),
            chunk_churn_timeout_ms: default_chunk_churn_timeout_ms(),
        }
    }
}

/// Snapshot sharding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotConfig {
    /// Number of shard files per snapshot.
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    /// Virtual nodes per shard on the hash ring.
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: usize,
}

fn default_shard_count() -> usize {
    8
}
fn default_virtual_nodes() -> usize {
    150
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            virtual_nodes: default_virtual_nodes(),
        }
    }
}

impl SnapshotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 || self.virtual_nodes == 0 {
            return Err(IndexErr::ConfigError {
                field: "snapshot".to_string(),
                cause: "shard_count and virtual_nodes must be positive".to_string(),
            });
        }
        Ok(())
    }
}
