//! Bounded-concurrency batch worker pool with retries.
//!
//! Submissions enter a FIFO ready-queue; at most `concurrency` handler
//! invocations are in flight at any moment under any interleaving. A
//! failing handler is re-invoked with the same batch after a full
//! exponential backoff (`min(base * 2^attempt, max)`) up to `max_retries`
//! times. `force_shutdown` drains the ready-queue immediately; in-flight
//! handlers are left to settle but the pool ignores their outcomes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::accumulator::Batch;
use crate::error::Result;

/// Error string queued batches resolve with after `force_shutdown`.
pub const FORCE_SHUTDOWN_ERROR: &str = "force shutdown";

/// Pool tuning.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_secs(5),
        }
    }
}

/// Terminal outcome of one submitted batch.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub batch_id: u64,
    pub success: bool,
    /// Retries performed (0 = first attempt succeeded).
    pub retry_count: u32,
    pub error: Option<String>,
}

/// Async batch handler.
pub type BatchHandler<T> = Arc<dyn Fn(Batch<T>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Point-in-time pool counters.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retries: u64,
    pub drained: u64,
    pub queued: u64,
    pub in_flight: u64,
}

struct QueuedBatch<T> {
    batch: Batch<T>,
    handler: BatchHandler<T>,
    done: oneshot::Sender<BatchResult>,
}

struct PoolState<T> {
    queue: VecDeque<QueuedBatch<T>>,
    in_flight: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    drained: AtomicU64,
}

/// FIFO batch pool.
pub struct WorkerPool<T> {
    config: WorkerPoolConfig,
    state: Mutex<PoolState<T>>,
    cancel: CancellationToken,
    counters: Counters,
}

impl<T: Clone + Send + 'static> WorkerPool<T> {
    pub fn new(config: WorkerPoolConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                in_flight: 0,
            }),
            cancel: CancellationToken::new(),
            counters: Counters::default(),
        })
    }

    /// Enqueue a batch; the returned future resolves with its terminal
    /// result once the handler (and its retries) settle.
    pub fn submit(
        self: &Arc<Self>,
        batch: Batch<T>,
        handler: BatchHandler<T>,
    ) -> impl Future<Output = BatchResult> + Send + 'static + use<T> {
        let batch_id = batch.id;
        let (done, rx) = oneshot::channel();

        if self.cancel.is_cancelled() {
            let _ = done.send(force_shutdown_result(batch_id));
        } else {
            self.counters.submitted.fetch_add(1, Ordering::Relaxed);
            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                state.queue.push_back(QueuedBatch {
                    batch,
                    handler,
                    done,
                });
            }
            self.dispatch();
        }

        async move { rx.await.unwrap_or_else(|_| force_shutdown_result(batch_id)) }
    }

    /// Cancel queued work immediately.
    ///
    /// Every batch still in the ready-queue resolves with
    /// `success = false, error = "force shutdown"` right away. In-flight
    /// handlers settle on their own; their outcomes are not retried and
    /// not counted.
    pub fn force_shutdown(self: &Arc<Self>) {
        self.cancel.cancel();
        let drained: Vec<QueuedBatch<T>> = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.queue.drain(..).collect()
        };
        self.counters
            .drained
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        for queued in drained {
            let _ = queued.done.send(force_shutdown_result(queued.batch.id));
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn stats(&self) -> PoolStats {
        let (queued, in_flight) = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            (state.queue.len() as u64, state.in_flight as u64)
        };
        PoolStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            drained: self.counters.drained.load(Ordering::Relaxed),
            queued,
            in_flight,
        }
    }

    /// Start as many queued batches as the concurrency cap allows.
    fn dispatch(self: &Arc<Self>) {
        loop {
            let queued = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if state.in_flight >= self.config.concurrency || state.queue.is_empty() {
                    return;
                }
                state.in_flight += 1;
                state.queue.pop_front()
            };
            let Some(queued) = queued else { return };

            let pool = Arc::clone(self);
            tokio::spawn(async move {
                let result = pool.run_with_retries(queued.batch, queued.handler).await;

                if !pool.cancel.is_cancelled() {
                    if result.success {
                        pool.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    } else {
                        pool.counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                let _ = queued.done.send(result);

                {
                    let mut state = pool.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.in_flight -= 1;
                }
                pool.dispatch();
            });
        }
    }

    async fn run_with_retries(&self, batch: Batch<T>, handler: BatchHandler<T>) -> BatchResult {
        let batch_id = batch.id;
        let mut retry_count: u32 = 0;

        loop {
            match (handler)(batch.clone()).await {
                Ok(()) => {
                    return BatchResult {
                        batch_id,
                        success: true,
                        retry_count,
                        error: None,
                    };
                }
                Err(error) => {
                    if retry_count >= self.config.max_retries || self.cancel.is_cancelled() {
                        return BatchResult {
                            batch_id,
                            success: false,
                            retry_count,
                            error: Some(error.to_string()),
                        };
                    }

                    let exponent = retry_count.min(31);
                    let delay = self
                        .config
                        .retry_base_delay
                        .saturating_mul(1u32 << exponent)
                        .min(self.config.retry_max_delay);
                    retry_count += 1;
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);

                    tracing::warn!(
                        batch_id = batch_id,
                        retry = retry_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "batch handler failed, retrying"
                    );

                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = self.cancel.cancelled() => {}
                    }
                }
            }
        }
    }
}

fn force_shutdown_result(batch_id: u64) -> BatchResult {
    BatchResult {
        batch_id,
        success: false,
        retry_count: 0,
        error: Some(FORCE_SHUTDOWN_ERROR.to_string()),
    }
}
