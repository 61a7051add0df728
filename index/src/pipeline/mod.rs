//! Streaming chunk -> embed -> upsert pipeline.
//!
//! `BatchAccumulator` turns a stream of items into size/time bounded
//! batches, `WorkerPool` runs batch handlers with bounded concurrency and
//! retries, and `ChunkPipeline` wires both to the embedding provider and
//! the vector store.

pub mod accumulator;
pub mod chunk_pipeline;
pub mod sparse;
pub mod worker_pool;

pub use accumulator::Batch;
pub use accumulator::BatchAccumulator;
pub use accumulator::BatchAccumulatorConfig;
pub use chunk_pipeline::ChunkItem;
pub use chunk_pipeline::ChunkPipeline;
pub use chunk_pipeline::DeleteItem;
pub use chunk_pipeline::PipelineStats;
pub use chunk_pipeline::UpsertCallback;
pub use sparse::sparse_vector;
pub use worker_pool::BatchResult;
pub use worker_pool::WorkerPool;
pub use worker_pool::WorkerPoolConfig;
