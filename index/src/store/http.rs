//! Qdrant-compatible REST vector store.
//!
//! Thin client over the collection/points HTTP API. Hybrid collections
//! register a named dense vector plus a sparse vector space; plain
//! collections use the default unnamed vector.

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use sha2::Digest;
use sha2::Sha256;
use uuid::Uuid;

use super::CollectionInfo;
use super::Distance;
use super::Filter;
use super::PayloadOp;
use super::ScoredPoint;
use super::VectorStore;
use crate::error::IndexErr;
use crate::error::Result;
use crate::types::Point;
use crate::types::SparseVector;

const DENSE_VECTOR_NAME: &str = "dense";
const SPARSE_VECTOR_NAME: &str = "sparse";

/// REST client for a Qdrant-compatible server.
#[derive(Debug, Clone)]
pub struct HttpVectorStore {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpVectorStore {
    /// Create a client for the given base URL (e.g. `http://localhost:6333`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// Attach an API key sent as the `api-key` header.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    async fn send(
        &self,
        operation: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<Value> {
        let response = builder
            .send()
            .await
            .map_err(|e| IndexErr::store(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexErr::store(operation, format!("{status}: {body}")));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| IndexErr::store(operation, e))?;
        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Point ids on the wire must be UUIDs; the reserved metadata id (and
    /// any other non-UUID id) is mapped deterministically.
    fn wire_id(id: &str) -> String {
        if Uuid::parse_str(id).is_ok() {
            return id.to_string();
        }
        let digest = Sha256::digest(id.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::from_bytes(bytes).to_string()
    }

    fn point_body(point: &Point, hybrid: bool) -> Value {
        let vector = if hybrid {
            let mut vectors = json!({ DENSE_VECTOR_NAME: point.vector });
            if let Some(sparse) = &point.sparse_vector {
                vectors[SPARSE_VECTOR_NAME] = json!({
                    "indices": sparse.indices,
                    "values": sparse.values,
                });
            }
            vectors
        } else {
            json!(point.vector)
        };

        json!({
            "id": Self::wire_id(&point.id),
            "vector": vector,
            "payload": point.payload,
        })
    }

    fn filter_body(filter: &Filter) -> Value {
        let must: Vec<Value> = filter
            .must
            .iter()
            .map(|m| {
                let matcher = if let Some(any) = &m.any {
                    json!({ "any": any })
                } else {
                    json!({ "value": m.value })
                };
                json!({ "key": m.key, "match": matcher })
            })
            .collect();
        json!({ "must": must })
    }

    fn scored_points(result: &Value) -> Vec<ScoredPoint> {
        let hits = result
            .get("points")
            .and_then(Value::as_array)
            .or_else(|| result.as_array());
        hits.map(|hits| {
            hits.iter()
                .map(|hit| ScoredPoint {
                    id: hit
                        .get("id")
                        .map(|v| v.as_str().map_or_else(|| v.to_string(), String::from))
                        .unwrap_or_default(),
                    score: hit.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                    payload: hit
                        .get("payload")
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default()
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        distance: Distance,
        hybrid: bool,
    ) -> Result<()> {
        let distance = match distance {
            Distance::Cosine => "Cosine",
            Distance::Dot => "Dot",
            Distance::Euclid => "Euclid",
        };
        let body = if hybrid {
            json!({
                "vectors": {
                    DENSE_VECTOR_NAME: { "size": dimension, "distance": distance }
                },
                "sparse_vectors": { SPARSE_VECTOR_NAME: {} },
            })
        } else {
            json!({ "vectors": { "size": dimension, "distance": distance } })
        };

        self.send(
            "create_collection",
            self.request(reqwest::Method::PUT, &format!("/collections/{name}"))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.send(
            "delete_collection",
            self.request(reqwest::Method::DELETE, &format!("/collections/{name}")),
        )
        .await?;
        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let result = self
            .send(
                "collection_exists",
                self.request(
                    reqwest::Method::GET,
                    &format!("/collections/{name}/exists"),
                ),
            )
            .await?;
        Ok(result
            .get("exists")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn get_collection_info(&self, name: &str) -> Result<CollectionInfo> {
        let result = self
            .send(
                "get_collection_info",
                self.request(reqwest::Method::GET, &format!("/collections/{name}")),
            )
            .await?;

        let point_count = result
            .get("points_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let config = result.get("config").cloned().unwrap_or(Value::Null);
        let vectors = &config["params"]["vectors"];
        let hybrid = vectors.get(DENSE_VECTOR_NAME).is_some();
        let dimension = if hybrid {
            vectors[DENSE_VECTOR_NAME]["size"].as_u64().unwrap_or(0)
        } else {
            vectors["size"].as_u64().unwrap_or(0)
        } as usize;
        let indexed_fields = result
            .get("payload_schema")
            .and_then(Value::as_object)
            .map(|schema| schema.keys().cloned().collect())
            .unwrap_or_default();

        Ok(CollectionInfo {
            point_count,
            dimension,
            hybrid,
            indexed_fields,
        })
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let result = self
            .send(
                "list_collections",
                self.request(reqwest::Method::GET, "/collections"),
            )
            .await?;
        Ok(result
            .get("collections")
            .and_then(Value::as_array)
            .map(|collections| {
                collections
                    .iter()
                    .filter_map(|c| c.get("name"))
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert(&self, name: &str, points: Vec<Point>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let hybrid = points.iter().any(|p| p.sparse_vector.is_some());
        let body = json!({
            "points": points
                .iter()
                .map(|p| Self::point_body(p, hybrid))
                .collect::<Vec<_>>(),
        });

        self.send(
            "upsert",
            self.request(
                reqwest::Method::PUT,
                &format!("/collections/{name}/points?wait=true&ordering=weak"),
            )
            .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn delete_by_filter(&self, name: &str, filter: Filter) -> Result<()> {
        let body = json!({ "filter": Self::filter_body(&filter) });
        self.send(
            "delete_by_filter",
            self.request(
                reqwest::Method::POST,
                &format!("/collections/{name}/points/delete?wait=true"),
            )
            .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn set_payload(
        &self,
        name: &str,
        payload: serde_json::Map<String, Value>,
        point_ids: &[String],
    ) -> Result<()> {
        if point_ids.is_empty() {
            return Ok(());
        }
        let body = json!({
            "payload": payload,
            "points": point_ids.iter().map(|id| Self::wire_id(id)).collect::<Vec<_>>(),
        });
        self.send(
            "set_payload",
            self.request(
                reqwest::Method::POST,
                &format!("/collections/{name}/points/payload?wait=true"),
            )
            .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn batch_set_payload(&self, name: &str, ops: Vec<PayloadOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let operations: Vec<Value> = ops
            .iter()
            .map(|op| {
                json!({
                    "set_payload": {
                        "payload": op.payload,
                        "points": op
                            .point_ids
                            .iter()
                            .map(|id| Self::wire_id(id))
                            .collect::<Vec<_>>(),
                    }
                })
            })
            .collect();

        self.send(
            "batch_set_payload",
            self.request(
                reqwest::Method::POST,
                &format!("/collections/{name}/points/batch?wait=true"),
            )
            .json(&json!({ "operations": operations })),
        )
        .await?;
        Ok(())
    }

    async fn get_point(&self, name: &str, id: &str) -> Result<Option<Point>> {
        let body = json!({
            "ids": [Self::wire_id(id)],
            "with_payload": true,
            "with_vector": false,
        });
        let result = self
            .send(
                "get_point",
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{name}/points"),
                )
                .json(&body),
            )
            .await?;

        let record = match result.as_array().and_then(|records| records.first()) {
            Some(record) => record,
            None => return Ok(None),
        };
        Ok(Some(Point {
            id: id.to_string(),
            vector: Vec::new(),
            sparse_vector: None,
            payload: record
                .get("payload")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        }))
    }

    async fn search(
        &self,
        name: &str,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<Filter>,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = &filter {
            body["filter"] = Self::filter_body(filter);
        }
        let result = self
            .send(
                "search",
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{name}/points/search"),
                )
                .json(&body),
            )
            .await?;
        Ok(Self::scored_points(&result))
    }

    async fn hybrid_search(
        &self,
        name: &str,
        dense: Vec<f32>,
        sparse: SparseVector,
        limit: usize,
        filter: Option<Filter>,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "prefetch": [
                {
                    "query": dense,
                    "using": DENSE_VECTOR_NAME,
                    "limit": limit * 2,
                },
                {
                    "query": { "indices": sparse.indices, "values": sparse.values },
                    "using": SPARSE_VECTOR_NAME,
                    "limit": limit * 2,
                },
            ],
            "query": { "fusion": "rrf" },
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = &filter {
            body["filter"] = Self::filter_body(filter);
        }
        let result = self
            .send(
                "hybrid_search",
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{name}/points/query"),
                )
                .json(&body),
            )
            .await?;
        Ok(Self::scored_points(&result))
    }

    async fn has_payload_index(&self, name: &str, field: &str) -> Result<bool> {
        let info = self.get_collection_info(name).await?;
        Ok(info.indexed_fields.iter().any(|f| f == field))
    }

    async fn create_payload_index(&self, name: &str, field: &str) -> Result<()> {
        let body = json!({
            "field_name": field,
            "field_schema": "keyword",
        });
        self.send(
            "create_payload_index",
            self.request(
                reqwest::Method::PUT,
                &format!("/collections/{name}/index?wait=true"),
            )
            .json(&body),
        )
        .await?;
        Ok(())
    }
}
