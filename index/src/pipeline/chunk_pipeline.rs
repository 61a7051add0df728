//! The streaming chunk -> embed -> upsert pipeline.
//!
//! Chunks accumulate into batches; each batch is embedded with one
//! provider call, zipped back into points, and upserted in one store
//! call. Deletes run through a separate accumulator and pool with wider
//! batches and higher concurrency because they are cheap server-side.
//!
//! ```text
//!   add_chunk ──► BatchAccumulator ──► WorkerPool (embed+upsert, K small)
//!                                            │ on ack
//!                                            ▼
//!                                   on_batch_upserted callback
//!   add_delete ─► BatchAccumulator ──► WorkerPool (delete, K large)
//! ```
//!
//! Backpressure: the depth counter tracks accepted-but-not-stored chunks.
//! Above `max_queue_size` the pipeline reports backpressure; the feeder
//! waits until depth falls under the low-water mark (half the high-water)
//! or its timeout elapses, whichever comes first.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::RwLock as StdRwLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::Notify;

use super::accumulator::Batch;
use super::accumulator::BatchAccumulator;
use super::accumulator::BatchAccumulatorConfig;
use super::sparse::sparse_vector;
use super::worker_pool::BatchHandler;
use super::worker_pool::WorkerPool;
use super::worker_pool::WorkerPoolConfig;
use crate::config::PipelineConfig;
use crate::error::IndexErr;
use crate::error::Result;
use crate::store::VectorStore;
use crate::traits::EmbeddingProvider;
use crate::types::Chunk;
use crate::types::ChunkPayload;
use crate::types::Point;

/// One chunk queued for embedding.
#[derive(Debug, Clone)]
pub struct ChunkItem {
    pub chunk_id: String,
    pub chunk: Chunk,
    /// Root the chunk's file path is made relative to.
    pub codebase_path: PathBuf,
}

impl ChunkItem {
    /// Root-relative, forward-slashed path of the chunk's file.
    pub fn relative_path(&self) -> String {
        self.chunk
            .metadata
            .file_path
            .strip_prefix(&self.codebase_path)
            .unwrap_or(&self.chunk.metadata.file_path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// One path queued for deletion.
#[derive(Debug, Clone)]
pub struct DeleteItem {
    pub relative_path: String,
}

/// Callback invoked after a batch's upsert is acknowledged.
pub type UpsertCallback = Arc<dyn Fn(Vec<ChunkItem>) + Send + Sync>;

/// Point-in-time pipeline counters.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub chunks_submitted: u64,
    pub batches_upserted: u64,
    pub points_upserted: u64,
    pub deletes_submitted: u64,
    pub delete_batches: u64,
    pub failed_batches: u64,
}

#[derive(Default)]
struct Counters {
    chunks_submitted: AtomicU64,
    batches_upserted: AtomicU64,
    points_upserted: AtomicU64,
    deletes_submitted: AtomicU64,
    delete_batches: AtomicU64,
    failed_batches: AtomicU64,
}

struct PipelineInner {
    config: PipelineConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    collection: String,
    embed_pool: Arc<WorkerPool<ChunkItem>>,
    delete_pool: Arc<WorkerPool<DeleteItem>>,
    /// Chunks accepted but not yet settled (stored or dropped).
    depth: AtomicUsize,
    depth_changed: Notify,
    /// Batches submitted to either pool and not yet settled.
    outstanding: AtomicUsize,
    outstanding_done: Notify,
    closed: AtomicBool,
    callback: StdRwLock<Option<UpsertCallback>>,
    counters: Counters,
    errors: StdMutex<Vec<String>>,
}

/// The embed/upsert/delete pipeline for one collection.
pub struct ChunkPipeline {
    inner: Arc<PipelineInner>,
    chunk_acc: BatchAccumulator<ChunkItem>,
    delete_acc: BatchAccumulator<DeleteItem>,
}

impl ChunkPipeline {
    pub fn new(
        config: PipelineConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        collection: &str,
    ) -> Self {
        let embed_pool = WorkerPool::new(WorkerPoolConfig {
            concurrency: config.embed_concurrency,
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay(),
            retry_max_delay: config.retry_max_delay(),
        });
        let delete_pool = WorkerPool::new(WorkerPoolConfig {
            concurrency: config.delete_concurrency,
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay(),
            retry_max_delay: config.retry_max_delay(),
        });

        let inner = Arc::new(PipelineInner {
            config: config.clone(),
            embedder,
            store,
            collection: collection.to_string(),
            embed_pool,
            delete_pool,
            depth: AtomicUsize::new(0),
            depth_changed: Notify::new(),
            outstanding: AtomicUsize::new(0),
            outstanding_done: Notify::new(),
            closed: AtomicBool::new(false),
            callback: StdRwLock::new(None),
            counters: Counters::default(),
            errors: StdMutex::new(Vec::new()),
        });

        let chunk_sink: super::accumulator::BatchSink<ChunkItem> = {
            let inner = Arc::clone(&inner);
            Arc::new(move |batch: Batch<ChunkItem>| {
                let inner = Arc::clone(&inner);
                let fut: futures::future::BoxFuture<'static, ()> =
                    Box::pin(async move { inner.dispatch_chunk_batch(batch) });
                fut
            })
        };
        let chunk_acc = BatchAccumulator::new(
            BatchAccumulatorConfig {
                batch_size: config.embed_batch_size,
                flush_timeout: config.flush_timeout(),
                kind: "chunk",
            },
            chunk_sink,
        );

        let delete_sink: super::accumulator::BatchSink<DeleteItem> = {
            let inner = Arc::clone(&inner);
            Arc::new(move |batch: Batch<DeleteItem>| {
                let inner = Arc::clone(&inner);
                let fut: futures::future::BoxFuture<'static, ()> =
                    Box::pin(async move { inner.dispatch_delete_batch(batch) });
                fut
            })
        };
        let delete_acc = BatchAccumulator::new(
            BatchAccumulatorConfig {
                batch_size: config.delete_batch_size,
                flush_timeout: config.flush_timeout(),
                kind: "delete",
            },
            delete_sink,
        );

        Self {
            inner,
            chunk_acc,
            delete_acc,
        }
    }

    /// Register the callback fired after each acknowledged upsert batch.
    ///
    /// Must be set before the first `add_chunk`.
    pub fn set_on_batch_upserted(&self, callback: UpsertCallback) {
        *self
            .inner
            .callback
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Mark the pipeline live.
    pub fn start(&self) {
        tracing::debug!(collection = %self.inner.collection, "pipeline started");
    }

    /// Queue one chunk for embedding.
    pub async fn add_chunk(
        &self,
        chunk: Chunk,
        chunk_id: String,
        codebase_path: &Path,
    ) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(IndexErr::PipelineClosed);
        }
        self.inner.depth.fetch_add(1, Ordering::AcqRel);
        self.inner
            .counters
            .chunks_submitted
            .fetch_add(1, Ordering::Relaxed);
        self.chunk_acc
            .add(ChunkItem {
                chunk_id,
                chunk,
                codebase_path: codebase_path.to_path_buf(),
            })
            .await;
        Ok(())
    }

    /// Queue one relative path for deletion.
    pub async fn add_delete(&self, relative_path: String) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(IndexErr::PipelineClosed);
        }
        self.inner
            .counters
            .deletes_submitted
            .fetch_add(1, Ordering::Relaxed);
        self.delete_acc.add(DeleteItem { relative_path }).await;
        Ok(())
    }

    /// Whether the queue depth is above the high-water mark.
    pub fn is_backpressured(&self) -> bool {
        self.inner.depth.load(Ordering::Acquire) > self.inner.config.max_queue_size
    }

    /// Wait until depth falls under the low-water mark.
    ///
    /// Returns `false` on timeout; the caller is expected to proceed
    /// anyway (a slightly overfull queue beats a hung pipeline).
    pub async fn wait_for_backpressure(&self, timeout: Duration) -> bool {
        let low_water = self.inner.config.max_queue_size / 2;
        let inner = Arc::clone(&self.inner);

        let wait = async move {
            loop {
                // Register before checking so a settle between the check
                // and the await cannot be missed.
                let notified = inner.depth_changed.notified();
                if inner.depth.load(Ordering::Acquire) <= low_water {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Force any timer-pending batches out of the accumulators.
    pub async fn flush(&self) {
        self.chunk_acc.flush().await;
        self.delete_acc.flush().await;
    }

    /// Flush, then wait for every submitted batch (and its retries) to
    /// settle. Further `add_chunk`/`add_delete` calls are refused.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.flush().await;

        loop {
            let notified = self.inner.outstanding_done.notified();
            if self.inner.outstanding.load(Ordering::Acquire) == 0 {
                break;
            }
            notified.await;
        }
        tracing::debug!(collection = %self.inner.collection, "pipeline drained");
    }

    /// Cancel queued batches immediately; in-flight handlers settle on
    /// their own and their outcomes are ignored.
    pub fn force_shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.embed_pool.force_shutdown();
        self.inner.delete_pool.force_shutdown();
    }

    /// Chunks accepted and not yet stored or dropped.
    pub fn get_pending_count(&self) -> usize {
        self.inner.depth.load(Ordering::Acquire)
    }

    pub fn get_stats(&self) -> PipelineStats {
        let c = &self.inner.counters;
        PipelineStats {
            chunks_submitted: c.chunks_submitted.load(Ordering::Relaxed),
            batches_upserted: c.batches_upserted.load(Ordering::Relaxed),
            points_upserted: c.points_upserted.load(Ordering::Relaxed),
            deletes_submitted: c.deletes_submitted.load(Ordering::Relaxed),
            delete_batches: c.delete_batches.load(Ordering::Relaxed),
            failed_batches: c.failed_batches.load(Ordering::Relaxed),
        }
    }

    /// Drain error strings accumulated from dropped batches.
    pub fn take_errors(&self) -> Vec<String> {
        std::mem::take(
            &mut *self
                .inner
                .errors
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        )
    }
}

impl PipelineInner {
    /// Hand an emitted chunk batch to the embed pool and track settlement.
    fn dispatch_chunk_batch(self: &Arc<Self>, batch: Batch<ChunkItem>) {
        let items_len = batch.items.len();
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        let handler = upsert_handler(Arc::clone(self));
        let result = self.embed_pool.submit(batch, handler);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let result = result.await;
            if result.success {
                inner.counters.batches_upserted.fetch_add(1, Ordering::Relaxed);
                inner
                    .counters
                    .points_upserted
                    .fetch_add(items_len as u64, Ordering::Relaxed);
            } else {
                inner.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                if let Some(error) = result.error {
                    inner
                        .errors
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(format!("chunk batch {}: {error}", result.batch_id));
                }
            }
            inner.settle(items_len);
        });
    }

    fn dispatch_delete_batch(self: &Arc<Self>, batch: Batch<DeleteItem>) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        let handler = delete_handler(Arc::clone(self));
        let result = self.delete_pool.submit(batch, handler);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let result = result.await;
            if result.success {
                inner.counters.delete_batches.fetch_add(1, Ordering::Relaxed);
            } else {
                inner.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                if let Some(error) = result.error {
                    inner
                        .errors
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(format!("delete batch {}: {error}", result.batch_id));
                }
            }
            inner.settle(0);
        });
    }

    fn settle(&self, chunks: usize) {
        if chunks > 0 {
            self.depth.fetch_sub(chunks, Ordering::AcqRel);
            self.depth_changed.notify_waiters();
        }
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.outstanding_done.notify_waiters();
    }
}

/// Handler for one embed+upsert batch: one embedding call, one upsert.
fn upsert_handler(inner: Arc<PipelineInner>) -> BatchHandler<ChunkItem> {
    Arc::new(move |batch: Batch<ChunkItem>| {
        let inner = Arc::clone(&inner);
        let fut: futures::future::BoxFuture<'static, Result<()>> = Box::pin(async move {
            let texts: Vec<String> = batch
                .items
                .iter()
                .map(|item| item.chunk.content.clone())
                .collect();
            let vectors = inner.embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.items.len() {
                return Err(IndexErr::EmbeddingFailed {
                    cause: format!(
                        "expected {} vectors, got {}",
                        batch.items.len(),
                        vectors.len()
                    ),
                });
            }

            let points: Vec<Point> = batch
                .items
                .iter()
                .zip(vectors)
                .map(|(item, vector)| {
                    let sparse = inner
                        .config
                        .hybrid
                        .then(|| sparse_vector(&item.chunk.content));
                    Point {
                        id: item.chunk_id.clone(),
                        vector,
                        sparse_vector: sparse,
                        payload: ChunkPayload::from_chunk(&item.chunk, &item.relative_path())
                            .to_payload_map(),
                    }
                })
                .collect();

            inner.store.upsert(&inner.collection, points).await?;

            // Fired only after the store acknowledged this batch.
            let callback = inner
                .callback
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            if let Some(callback) = callback {
                callback(batch.items.clone());
            }
            Ok(())
        });
        fut
    })
}

/// Handler for one delete batch: a single by-path filter deletion.
fn delete_handler(inner: Arc<PipelineInner>) -> BatchHandler<DeleteItem> {
    Arc::new(move |batch: Batch<DeleteItem>| {
        let inner = Arc::clone(&inner);
        let fut: futures::future::BoxFuture<'static, Result<()>> = Box::pin(async move {
            let paths: Vec<String> = batch
                .items
                .iter()
                .map(|item| item.relative_path.clone())
                .collect();
            inner.store.delete_by_paths(&inner.collection, &paths).await
        });
        fut
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64 as StdAtomicU64;

    use super::*;
    use crate::config::PipelineConfig;
    use crate::store::Distance;
    use crate::store::InMemoryStore;
    use crate::store::StoreOp;
    use crate::testing::StubEmbedder;
    use crate::testing::chunk_for;

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            embed_batch_size: 2,
            flush_timeout_ms: 50,
            max_queue_size: 100,
            embed_concurrency: 2,
            delete_batch_size: 3,
            delete_concurrency: 4,
            max_retries: 1,
            retry_base_delay_ms: 5,
            retry_max_delay_ms: 20,
            hybrid: false,
        }
    }

    async fn pipeline_with_store() -> (ChunkPipeline, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store
            .create_collection("c", 4, Distance::Cosine, false)
            .await
            .unwrap();
        let pipeline = ChunkPipeline::new(
            test_config(),
            Arc::new(StubEmbedder::new(4)),
            store.clone(),
            "c",
        );
        (pipeline, store)
    }

    #[tokio::test]
    async fn chunks_flow_to_the_store() {
        let (pipeline, store) = pipeline_with_store().await;
        let root = PathBuf::from("/repo");

        for i in 0..5 {
            let chunk = chunk_for(&root.join(format!("src/f{i}.rs")), &format!("fn f{i}() {{}}"), 0);
            pipeline
                .add_chunk(chunk, format!("id-{i}"), &root)
                .await
                .unwrap();
        }
        pipeline.flush().await;
        pipeline.shutdown().await;

        let stats = pipeline.get_stats();
        assert_eq!(stats.chunks_submitted, 5);
        assert_eq!(stats.points_upserted, 5);
        assert_eq!(stats.failed_batches, 0);
        // batch_size 2 -> 2 full batches + 1 tail.
        assert_eq!(stats.batches_upserted, 3);

        let info = store.get_collection_info("c").await.unwrap();
        assert_eq!(info.point_count, 5);
        let point = store.get_point("c", "id-3").await.unwrap().unwrap();
        assert_eq!(point.payload["relativePath"], "src/f3.rs");
    }

    #[tokio::test]
    async fn callback_fires_per_acknowledged_batch() {
        let (pipeline, _store) = pipeline_with_store().await;
        let root = PathBuf::from("/repo");

        let calls = Arc::new(StdAtomicU64::new(0));
        let items_seen = Arc::new(StdMutex::new(Vec::new()));
        {
            let calls = Arc::clone(&calls);
            let items_seen = Arc::clone(&items_seen);
            pipeline.set_on_batch_upserted(Arc::new(move |items| {
                calls.fetch_add(1, Ordering::SeqCst);
                items_seen
                    .lock()
                    .unwrap()
                    .extend(items.into_iter().map(|i| i.chunk_id));
            }));
        }

        for i in 0..4 {
            let chunk = chunk_for(&root.join("src/a.rs"), &format!("fn f{i}() {{}}"), i);
            pipeline
                .add_chunk(chunk, format!("id-{i}"), &root)
                .await
                .unwrap();
        }
        pipeline.flush().await;
        pipeline.shutdown().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let mut ids = items_seen.lock().unwrap().clone();
        ids.sort();
        assert_eq!(ids, vec!["id-0", "id-1", "id-2", "id-3"]);
    }

    #[tokio::test]
    async fn deletes_are_batched_by_path() {
        let (pipeline, store) = pipeline_with_store().await;

        for i in 0..7 {
            pipeline
                .add_delete(format!("src/f{i}.rs"))
                .await
                .unwrap();
        }
        pipeline.flush().await;
        pipeline.shutdown().await;

        let stats = pipeline.get_stats();
        assert_eq!(stats.deletes_submitted, 7);
        // delete_batch_size 3 -> 3 batches.
        assert_eq!(stats.delete_batches, 3);

        let deletes = store
            .operations()
            .await
            .iter()
            .filter(|op| matches!(op, StoreOp::Delete { .. }))
            .count();
        assert_eq!(deletes, 3);
    }

    #[tokio::test]
    async fn add_after_shutdown_is_refused() {
        let (pipeline, _store) = pipeline_with_store().await;
        pipeline.shutdown().await;

        let chunk = chunk_for(&PathBuf::from("/repo/a.rs"), "fn a() {}", 0);
        let result = pipeline
            .add_chunk(chunk, "id".to_string(), &PathBuf::from("/repo"))
            .await;
        assert!(matches!(result, Err(IndexErr::PipelineClosed)));
        assert!(matches!(
            pipeline.add_delete("a.rs".to_string()).await,
            Err(IndexErr::PipelineClosed)
        ));
    }

    #[tokio::test]
    async fn failed_batches_are_recorded_and_do_not_stall() {
        let (pipeline, store) = pipeline_with_store().await;
        let root = PathBuf::from("/repo");

        // max_retries 1 -> two attempts per batch; three injected failures
        // sink exactly the first batch, the second succeeds.
        store.inject_failures("upsert", 3).await;

        for i in 0..4 {
            let chunk = chunk_for(&root.join("src/a.rs"), &format!("fn f{i}() {{}}"), i);
            pipeline
                .add_chunk(chunk, format!("id-{i}"), &root)
                .await
                .unwrap();
        }
        pipeline.flush().await;
        pipeline.shutdown().await;

        let stats = pipeline.get_stats();
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.batches_upserted, 1);
        assert_eq!(pipeline.get_pending_count(), 0);
        let errors = pipeline.take_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("injected failure"));
    }

    #[tokio::test]
    async fn backpressure_engages_and_releases() {
        let store = Arc::new(InMemoryStore::new());
        store
            .create_collection("c", 4, Distance::Cosine, false)
            .await
            .unwrap();
        let config = PipelineConfig {
            max_queue_size: 2,
            embed_batch_size: 1,
            ..test_config()
        };
        let pipeline = ChunkPipeline::new(
            config,
            Arc::new(StubEmbedder::new(4).with_delay(Duration::from_millis(20))),
            store,
            "c",
        );
        let root = PathBuf::from("/repo");

        for i in 0..4 {
            let chunk = chunk_for(&root.join("src/a.rs"), &format!("fn f{i}() {{}}"), i);
            pipeline
                .add_chunk(chunk, format!("id-{i}"), &root)
                .await
                .unwrap();
        }
        assert!(pipeline.is_backpressured());

        // Far too short to drain: times out and reports false.
        assert!(!pipeline.wait_for_backpressure(Duration::from_millis(1)).await);

        // Generous timeout: resolves once depth falls under low water.
        assert!(
            pipeline
                .wait_for_backpressure(Duration::from_secs(5))
                .await
        );
        pipeline.shutdown().await;
        assert_eq!(pipeline.get_pending_count(), 0);
    }

    #[tokio::test]
    async fn hybrid_mode_attaches_sparse_vectors() {
        let store = Arc::new(InMemoryStore::new());
        store
            .create_collection("c", 4, Distance::Cosine, true)
            .await
            .unwrap();
        let config = PipelineConfig {
            hybrid: true,
            ..test_config()
        };
        let pipeline = ChunkPipeline::new(
            config,
            Arc::new(StubEmbedder::new(4)),
            store.clone(),
            "c",
        );
        let root = PathBuf::from("/repo");

        let chunk = chunk_for(&root.join("src/a.rs"), "fn getUser() {}", 0);
        pipeline.add_chunk(chunk, "id-0".to_string(), &root).await.unwrap();
        pipeline.flush().await;
        pipeline.shutdown().await;

        let point = store.get_point("c", "id-0").await.unwrap().unwrap();
        assert!(point.sparse_vector.is_some());
        assert!(!point.sparse_vector.unwrap().indices.is_empty());
    }
}
