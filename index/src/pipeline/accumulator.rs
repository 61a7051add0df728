//! Size/time bounded batch accumulation.
//!
//! Items buffer until either `batch_size` is reached or a one-shot timer
//! armed by the first buffered item fires. Batch ids are monotonic, item
//! order inside a batch is insertion order, and batches are emitted in id
//! order because emission happens under the buffer lock.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// An emitted batch.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    /// Monotonic per-accumulator id, starting at 1.
    pub id: u64,
    /// Tag describing what the items are ("chunk", "delete").
    pub kind: &'static str,
    pub items: Vec<T>,
    pub created_at: Instant,
}

/// Accumulator tuning.
#[derive(Debug, Clone)]
pub struct BatchAccumulatorConfig {
    pub batch_size: usize,
    pub flush_timeout: Duration,
    /// Tag copied into every emitted batch.
    pub kind: &'static str,
}

/// Sink receiving emitted batches.
pub type BatchSink<T> = Arc<dyn Fn(Batch<T>) -> BoxFuture<'static, ()> + Send + Sync>;

struct AccumulatorState<T> {
    buffer: Vec<T>,
    next_id: u64,
    timer: Option<JoinHandle<()>>,
    /// Invalidates timers armed for earlier generations of the buffer.
    generation: u64,
}

/// Size/time bounded batcher.
pub struct BatchAccumulator<T> {
    config: BatchAccumulatorConfig,
    state: Arc<Mutex<AccumulatorState<T>>>,
    sink: BatchSink<T>,
}

impl<T: Send + 'static> BatchAccumulator<T> {
    pub fn new(config: BatchAccumulatorConfig, sink: BatchSink<T>) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(AccumulatorState {
                buffer: Vec::new(),
                next_id: 1,
                timer: None,
                generation: 0,
            })),
            sink,
        }
    }

    /// Append an item; emits immediately when the buffer fills.
    pub async fn add(&self, item: T) {
        let mut state = self.state.lock().await;
        state.buffer.push(item);

        if state.buffer.len() >= self.config.batch_size {
            self.emit_locked(&mut state).await;
        } else if state.timer.is_none() {
            state.timer = Some(self.arm_timer(state.generation));
        }
    }

    /// Emit whatever is buffered and cancel the timer.
    pub async fn flush(&self) {
        let mut state = self.state.lock().await;
        if !state.buffer.is_empty() {
            self.emit_locked(&mut state).await;
        } else if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    /// Items currently buffered (not yet emitted).
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.buffer.len()
    }

    async fn emit_locked(&self, state: &mut AccumulatorState<T>) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;

        let items = std::mem::take(&mut state.buffer);
        let batch = Batch {
            id: state.next_id,
            kind: self.config.kind,
            items,
            created_at: Instant::now(),
        };
        state.next_id += 1;

        // Awaiting the sink under the lock serializes emissions, which is
        // what guarantees batches reach the pool in id order.
        (self.sink)(batch).await;
    }

    fn arm_timer(&self, generation: u64) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);
        let config = self.config.clone();

        tokio::spawn(async move {
            tokio::time::sleep(config.flush_timeout).await;

            let mut state = state.lock().await;
            // A fill-triggered emit or explicit flush already ran.
            if state.generation != generation || state.buffer.is_empty() {
                return;
            }
            state.timer = None;
            state.generation += 1;

            let items = std::mem::take(&mut state.buffer);
            let batch = Batch {
                id: state.next_id,
                kind: config.kind,
                items,
                created_at: Instant::now(),
            };
            state.next_id += 1;
            (sink)(batch).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    type Emitted = Arc<StdMutex<Vec<(u64, Vec<u32>)>>>;

    fn collecting_sink(emitted: &Emitted) -> BatchSink<u32> {
        let emitted = Arc::clone(emitted);
        Arc::new(move |batch: Batch<u32>| {
            let emitted = Arc::clone(&emitted);
            Box::pin(async move {
                emitted.lock().unwrap().push((batch.id, batch.items));
            })
        })
    }

    fn accumulator(batch_size: usize, timeout_ms: u64, emitted: &Emitted) -> BatchAccumulator<u32> {
        BatchAccumulator::new(
            BatchAccumulatorConfig {
                batch_size,
                flush_timeout: Duration::from_millis(timeout_ms),
                kind: "test",
            },
            collecting_sink(emitted),
        )
    }

    #[tokio::test]
    async fn emits_full_batches_of_exact_size() {
        let emitted: Emitted = Arc::default();
        let acc = accumulator(3, 10_000, &emitted);

        for i in 0..7 {
            acc.add(i).await;
        }
        acc.flush().await;

        let batches = emitted.lock().unwrap().clone();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].1, vec![0, 1, 2]);
        assert_eq!(batches[1].1, vec![3, 4, 5]);
        // The tail from flush may be shorter.
        assert_eq!(batches[2].1, vec![6]);
    }

    #[tokio::test]
    async fn batch_ids_are_monotonic() {
        let emitted: Emitted = Arc::default();
        let acc = accumulator(2, 10_000, &emitted);

        for i in 0..6 {
            acc.add(i).await;
        }

        let ids: Vec<u64> = emitted.lock().unwrap().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_partial_batch() {
        let emitted: Emitted = Arc::default();
        let acc = accumulator(100, 50, &emitted);

        acc.add(1).await;
        acc.add(2).await;
        assert_eq!(acc.pending_count().await, 2);

        tokio::time::sleep(Duration::from_millis(80)).await;
        // Let the spawned timer task run.
        tokio::task::yield_now().await;

        let batches = emitted.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1, vec![1, 2]);
        assert_eq!(acc.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_cancels_pending_timer() {
        let emitted: Emitted = Arc::default();
        let acc = accumulator(100, 50, &emitted);

        acc.add(1).await;
        acc.flush().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;

        // Exactly one batch: from the flush, not the timer.
        let batches = emitted.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
    }

    #[tokio::test]
    async fn flush_on_empty_buffer_emits_nothing() {
        let emitted: Emitted = Arc::default();
        let acc = accumulator(10, 1000, &emitted);
        acc.flush().await;
        assert!(emitted.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn items_after_timer_fire_start_a_new_batch() {
        let emitted: Emitted = Arc::default();
        let acc = accumulator(100, 50, &emitted);

        acc.add(1).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        tokio::task::yield_now().await;

        acc.add(2).await;
        acc.flush().await;

        let batches = emitted.lock().unwrap().clone();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].1, vec![1]);
        assert_eq!(batches[1].1, vec![2]);
    }
}
