//! In-memory vector store used by tests.
//!
//! Implements the full `VectorStore` surface over hash maps, with brute
//! force cosine scoring. Also records an operation log and supports
//! injected failures so tests can exercise retry and fallback paths.

use std::collections::HashMap;
use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::RwLock;

use super::CollectionInfo;
use super::Distance;
use super::FieldMatch;
use super::Filter;
use super::PayloadOp;
use super::ScoredPoint;
use super::VectorStore;
use crate::error::IndexErr;
use crate::error::Result;
use crate::types::Point;
use crate::types::SparseVector;

/// One recorded store operation, for assertions on ordering.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Upsert { paths: Vec<String> },
    Delete { paths: Vec<String> },
    SetPayload { point_ids: Vec<String> },
}

#[derive(Debug, Default)]
struct MemCollection {
    dimension: usize,
    hybrid: bool,
    points: HashMap<String, Point>,
    indexed_fields: HashSet<String>,
}

/// Test-double store.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, MemCollection>>,
    ops: Mutex<Vec<StoreOp>>,
    failures: Mutex<HashMap<String, u32>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls of `operation` fail.
    pub async fn inject_failures(&self, operation: &str, count: u32) {
        self.failures
            .lock()
            .await
            .insert(operation.to_string(), count);
    }

    /// The recorded operation log, oldest first.
    pub async fn operations(&self) -> Vec<StoreOp> {
        self.ops.lock().await.clone()
    }

    async fn check_failure(&self, operation: &str) -> Result<()> {
        let mut failures = self.failures.lock().await;
        if let Some(remaining) = failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(IndexErr::store(operation, "injected failure"));
            }
        }
        Ok(())
    }

    async fn record(&self, op: StoreOp) {
        self.ops.lock().await.push(op);
    }

    fn payload_paths(points: &[Point]) -> Vec<String> {
        points
            .iter()
            .filter_map(|p| p.payload.get("relativePath"))
            .filter_map(|v| v.as_str().map(String::from))
            .collect()
    }
}

fn matches(point: &Point, filter: &Filter) -> bool {
    filter.must.iter().all(|m| field_matches(point, m))
}

fn field_matches(point: &Point, m: &FieldMatch) -> bool {
    let Some(actual) = point.payload.get(&m.key) else {
        return false;
    };
    if let Some(value) = &m.value {
        return actual == value;
    }
    if let Some(any) = &m.any {
        return actual.as_str().is_some_and(|s| any.iter().any(|a| a == s));
    }
    false
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

fn sparse_dot(a: &SparseVector, b: &SparseVector) -> f32 {
    let lookup: HashMap<u32, f32> = a.indices.iter().copied().zip(a.values.iter().copied()).collect();
    b.indices
        .iter()
        .zip(&b.values)
        .filter_map(|(i, v)| lookup.get(i).map(|av| av * v))
        .sum()
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        _distance: Distance,
        hybrid: bool,
    ) -> Result<()> {
        self.check_failure("create_collection").await?;
        let mut collections = self.collections.write().await;
        collections.insert(
            name.to_string(),
            MemCollection {
                dimension,
                hybrid,
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.check_failure("delete_collection").await?;
        self.collections.write().await.remove(name);
        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn get_collection_info(&self, name: &str) -> Result<CollectionInfo> {
        let collections = self.collections.read().await;
        let collection = collections
            .get(name)
            .ok_or_else(|| IndexErr::store("get_collection_info", format!("{name} not found")))?;
        Ok(CollectionInfo {
            point_count: collection.points.len() as u64,
            dimension: collection.dimension,
            hybrid: collection.hybrid,
            indexed_fields: collection.indexed_fields.iter().cloned().collect(),
        })
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn upsert(&self, name: &str, points: Vec<Point>) -> Result<()> {
        self.check_failure("upsert").await?;
        self.record(StoreOp::Upsert {
            paths: Self::payload_paths(&points),
        })
        .await;

        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| IndexErr::store("upsert", format!("{name} not found")))?;
        for point in points {
            collection.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn delete_by_filter(&self, name: &str, filter: Filter) -> Result<()> {
        self.check_failure("delete_by_filter").await?;

        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| IndexErr::store("delete_by_filter", format!("{name} not found")))?;

        let doomed: Vec<(String, Option<String>)> = collection
            .points
            .values()
            .filter(|p| matches(p, &filter))
            .map(|p| {
                let path = p
                    .payload
                    .get("relativePath")
                    .and_then(|v| v.as_str().map(String::from));
                (p.id.clone(), path)
            })
            .collect();
        let mut paths = Vec::new();
        for (id, path) in doomed {
            collection.points.remove(&id);
            paths.extend(path);
        }
        drop(collections);

        self.record(StoreOp::Delete { paths }).await;
        Ok(())
    }

    async fn delete_by_paths(&self, name: &str, paths: &[String]) -> Result<()> {
        self.check_failure("delete_by_paths").await?;
        self.delete_by_filter(name, Filter::relative_path_any(paths))
            .await
    }

    async fn set_payload(
        &self,
        name: &str,
        payload: serde_json::Map<String, serde_json::Value>,
        point_ids: &[String],
    ) -> Result<()> {
        self.check_failure("set_payload").await?;
        self.record(StoreOp::SetPayload {
            point_ids: point_ids.to_vec(),
        })
        .await;

        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| IndexErr::store("set_payload", format!("{name} not found")))?;
        for id in point_ids {
            if let Some(point) = collection.points.get_mut(id) {
                // Merge semantics: keys in the request win, others survive.
                for (key, value) in &payload {
                    point.payload.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn batch_set_payload(&self, name: &str, ops: Vec<PayloadOp>) -> Result<()> {
        self.check_failure("batch_set_payload").await?;
        for op in ops {
            self.set_payload(name, op.payload, &op.point_ids).await?;
        }
        Ok(())
    }

    async fn get_point(&self, name: &str, id: &str) -> Result<Option<Point>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(name)
            .and_then(|c| c.points.get(id))
            .cloned())
    }

    async fn search(
        &self,
        name: &str,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<Filter>,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.read().await;
        let collection = collections
            .get(name)
            .ok_or_else(|| IndexErr::store("search", format!("{name} not found")))?;

        let mut hits: Vec<ScoredPoint> = collection
            .points
            .values()
            .filter(|p| p.id != crate::types::METADATA_POINT_ID)
            .filter(|p| filter.as_ref().is_none_or(|f| matches(p, f)))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: cosine(&vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn hybrid_search(
        &self,
        name: &str,
        dense: Vec<f32>,
        sparse: SparseVector,
        limit: usize,
        filter: Option<Filter>,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.read().await;
        let collection = collections
            .get(name)
            .ok_or_else(|| IndexErr::store("hybrid_search", format!("{name} not found")))?;

        let mut hits: Vec<ScoredPoint> = collection
            .points
            .values()
            .filter(|p| p.id != crate::types::METADATA_POINT_ID)
            .filter(|p| filter.as_ref().is_none_or(|f| matches(p, f)))
            .map(|p| {
                let dense_score = cosine(&dense, &p.vector);
                let sparse_score = p
                    .sparse_vector
                    .as_ref()
                    .map_or(0.0, |sv| sparse_dot(&sparse, sv));
                ScoredPoint {
                    id: p.id.clone(),
                    score: dense_score + sparse_score,
                    payload: p.payload.clone(),
                }
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn has_payload_index(&self, name: &str, field: &str) -> Result<bool> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(name)
            .is_some_and(|c| c.indexed_fields.contains(field)))
    }

    async fn create_payload_index(&self, name: &str, field: &str) -> Result<()> {
        self.check_failure("create_payload_index").await?;
        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| IndexErr::store("create_payload_index", format!("{name} not found")))?;
        collection.indexed_fields.insert(field.to_string());
        Ok(())
    }
}
