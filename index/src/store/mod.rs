//! Vector store interface.
//!
//! The core treats the store as a thread-safe black box. `HttpVectorStore`
//! talks to a Qdrant-compatible server; `InMemoryStore` backs the tests.
//! All payload writes are merges: keys present in the request are set,
//! everything else is left alone.

pub mod http;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::types::Point;
use crate::types::SparseVector;

pub use http::HttpVectorStore;
pub use memory::InMemoryStore;
pub use memory::StoreOp;

/// Distance metric for the dense vector space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    Cosine,
    Dot,
    Euclid,
}

impl Default for Distance {
    fn default() -> Self {
        Self::Cosine
    }
}

/// A single payload-field condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMatch {
    pub key: String,
    /// Exact value, or any-of when `any` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub any: Option<Vec<String>>,
}

/// Conjunction of field conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub must: Vec<FieldMatch>,
}

impl Filter {
    /// Match points belonging to one relative path.
    pub fn relative_path(path: &str) -> Self {
        Self {
            must: vec![FieldMatch {
                key: "relativePath".to_string(),
                value: Some(serde_json::Value::String(path.to_string())),
                any: None,
            }],
        }
    }

    /// Match points belonging to any of the given relative paths.
    pub fn relative_path_any(paths: &[String]) -> Self {
        Self {
            must: vec![FieldMatch {
                key: "relativePath".to_string(),
                value: None,
                any: Some(paths.to_vec()),
            }],
        }
    }
}

/// Collection metadata.
#[derive(Debug, Clone, Default)]
pub struct CollectionInfo {
    pub point_count: u64,
    pub dimension: usize,
    pub hybrid: bool,
    /// Payload fields with an index, by name.
    pub indexed_fields: Vec<String>,
}

/// A search hit.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// One merge-payload operation for `batch_set_payload`.
#[derive(Debug, Clone)]
pub struct PayloadOp {
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub point_ids: Vec<String>,
}

/// Vector store operations the indexing core depends on.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        distance: Distance,
        hybrid: bool,
    ) -> Result<()>;

    async fn delete_collection(&self, name: &str) -> Result<()>;

    async fn collection_exists(&self, name: &str) -> Result<bool>;

    async fn get_collection_info(&self, name: &str) -> Result<CollectionInfo>;

    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Upsert points; weak ordering is acceptable.
    async fn upsert(&self, name: &str, points: Vec<Point>) -> Result<()>;

    async fn delete_by_filter(&self, name: &str, filter: Filter) -> Result<()>;

    /// Batch form of by-path deletion.
    async fn delete_by_paths(&self, name: &str, paths: &[String]) -> Result<()> {
        self.delete_by_filter(name, Filter::relative_path_any(paths))
            .await
    }

    /// Merge `payload` into each of the given points.
    async fn set_payload(
        &self,
        name: &str,
        payload: serde_json::Map<String, serde_json::Value>,
        point_ids: &[String],
    ) -> Result<()>;

    /// Multiple merge operations in one request.
    async fn batch_set_payload(&self, name: &str, ops: Vec<PayloadOp>) -> Result<()>;

    async fn get_point(&self, name: &str, id: &str) -> Result<Option<Point>>;

    async fn search(
        &self,
        name: &str,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<Filter>,
    ) -> Result<Vec<ScoredPoint>>;

    async fn hybrid_search(
        &self,
        name: &str,
        dense: Vec<f32>,
        sparse: SparseVector,
        limit: usize,
        filter: Option<Filter>,
    ) -> Result<Vec<ScoredPoint>>;

    async fn has_payload_index(&self, name: &str, field: &str) -> Result<bool>;

    async fn create_payload_index(&self, name: &str, field: &str) -> Result<()>;
}

/// Options for `delete_by_paths_batched`.
#[derive(Debug, Clone)]
pub struct DeleteBatchOptions {
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for DeleteBatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 500,
            concurrency: 8,
        }
    }
}

/// Progress callback: (paths done, paths total).
pub type DeleteProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Delete paths in parallel batches.
///
/// Returns the number of paths whose batch succeeded. Failed batches are
/// reported through the error of the first failure after all batches have
/// settled, so partial progress is never lost to an early return.
pub async fn delete_by_paths_batched(
    store: &dyn VectorStore,
    name: &str,
    paths: &[String],
    options: &DeleteBatchOptions,
    on_progress: Option<DeleteProgress>,
) -> Result<u64> {
    if paths.is_empty() {
        return Ok(0);
    }

    let total = paths.len() as u64;
    let batches: Vec<Vec<String>> = paths
        .chunks(options.batch_size.max(1))
        .map(<[String]>::to_vec)
        .collect();

    let mut done: u64 = 0;
    let mut first_error: Option<crate::error::IndexErr> = None;

    let mut results = stream::iter(batches)
        .map(|batch| async move {
            let len = batch.len() as u64;
            (store.delete_by_paths(name, &batch).await, len)
        })
        .buffer_unordered(options.concurrency.max(1));

    while let Some((result, len)) = results.next().await {
        match result {
            Ok(()) => {
                done += len;
                if let Some(progress) = &on_progress {
                    progress(done, total);
                }
            }
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(done),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;
    use std::sync::atomic::Ordering;

    use super::*;

    #[tokio::test]
    async fn batched_delete_reports_progress() {
        let store = InMemoryStore::new();
        store
            .create_collection("c", 4, Distance::Cosine, false)
            .await
            .unwrap();

        let paths: Vec<String> = (0..25).map(|i| format!("src/f{i}.rs")).collect();
        let seen = Arc::new(AtomicU64::new(0));
        let seen_cb = Arc::clone(&seen);

        let deleted = delete_by_paths_batched(
            &store,
            "c",
            &paths,
            &DeleteBatchOptions {
                batch_size: 10,
                concurrency: 2,
            },
            Some(Arc::new(move |done, _total| {
                seen_cb.store(done, Ordering::SeqCst);
            })),
        )
        .await
        .unwrap();

        assert_eq!(deleted, 25);
        assert_eq!(seen.load(Ordering::SeqCst), 25);
    }

    #[test]
    fn path_filters_serialize_expected_shape() {
        let one = Filter::relative_path("src/a.rs");
        assert_eq!(one.must[0].key, "relativePath");
        assert_eq!(
            one.must[0].value,
            Some(serde_json::Value::String("src/a.rs".to_string()))
        );

        let many = Filter::relative_path_any(&["a".to_string(), "b".to_string()]);
        assert_eq!(many.must[0].any.as_ref().unwrap().len(), 2);
    }
}
