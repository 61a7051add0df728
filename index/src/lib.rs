//! tea-rags indexing core.
//!
//! Indexes a local source repository into a vector database for semantic
//! and hybrid code search, keeps the index incrementally synchronized,
//! and enriches stored chunks with version-control signals (authorship,
//! churn, recency, bug-fix frequency).
//!
//! The three cooperating subsystems:
//! - the streaming chunk -> embed -> upsert pipeline with bounded
//!   concurrency, backpressure and batch accumulation ([`pipeline`]);
//! - the incremental change detector with sharded snapshots, consistent
//!   hashing and resumable checkpoints ([`snapshot`]);
//! - the git-metadata enrichment that overlaps `git log` with embedding
//!   and merges signals into stored payloads ([`enrichment`]).
//!
//! The AST chunker, the embedding provider and the vector store are
//! external collaborators behind traits ([`chunking::Chunker`],
//! [`traits::EmbeddingProvider`], [`store::VectorStore`]).

// Core modules
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

// Subsystems
pub mod chunking;
pub mod embeddings;
pub mod enrichment;
pub mod orchestrator;
pub mod pipeline;
pub mod scanner;
pub mod schema;
pub mod secrets;
pub mod snapshot;
pub mod store;

// Test support (deterministic stand-ins for external collaborators)
pub mod testing;

// Re-exports
pub use config::IndexConfig;
pub use error::IndexErr;
pub use error::Result;
pub use orchestrator::IndexOptions;
pub use orchestrator::IndexerOrchestrator;
pub use scanner::FileScanner;
pub use schema::SchemaManager;
pub use types::Chunk;
pub use types::ChunkMetadata;
pub use types::ChunkType;
pub use types::FileMetadata;
pub use types::IndexState;
pub use types::IndexStats;
pub use types::IndexStatus;
pub use types::Point;
pub use types::ReindexStats;
pub use types::collection_name_for_path;

// Pipeline exports
pub use pipeline::BatchAccumulator;
pub use pipeline::ChunkPipeline;
pub use pipeline::WorkerPool;

// Snapshot exports
pub use snapshot::ChangeDetector;
pub use snapshot::CheckpointStore;
pub use snapshot::ConsistentHash;
pub use snapshot::ShardedSnapshot;
pub use snapshot::SnapshotMigrator;

// Enrichment exports
pub use enrichment::EnrichmentModule;

// Store exports
pub use store::HttpVectorStore;
pub use store::InMemoryStore;
pub use store::VectorStore;
