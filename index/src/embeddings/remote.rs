//! OpenAI-compatible embeddings provider.
//!
//! Talks to any server exposing the `/embeddings` endpoint shape. The
//! pipeline only ever calls `embed_batch`, once per accumulated batch.

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::error::IndexErr;
use crate::error::Result;
use crate::traits::EmbeddingProvider;

const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_DIMENSION: usize = 1536;

/// HTTP embeddings provider.
#[derive(Debug, Clone)]
pub struct RemoteEmbeddings {
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    client: reqwest::Client,
}

impl RemoteEmbeddings {
    /// Create a provider with the default model and endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn request_embeddings(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input,
            dimensions: Some(self.dimension),
            encoding_format: Some("float".to_string()),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| IndexErr::EmbeddingFailed {
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexErr::EmbeddingFailed {
                cause: format!("API error {status}: {body}"),
            });
        }

        let result: EmbeddingResponse =
            response.json().await.map_err(|e| IndexErr::EmbeddingFailed {
                cause: e.to_string(),
            })?;

        // The API may return entries out of order; sort by index.
        let mut embeddings: Vec<(usize, Vec<f32>)> = result
            .data
            .into_iter()
            .map(|e| (e.index, e.embedding))
            .collect();
        embeddings.sort_by_key(|(index, _)| *index);

        Ok(embeddings.into_iter().map(|(_, e)| e).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddings {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.request_embeddings(texts.to_vec()).await?;
        if embeddings.len() != texts.len() {
            return Err(IndexErr::EmbeddingFailed {
                cause: format!(
                    "expected {} vectors, got {}",
                    texts.len(),
                    embeddings.len()
                ),
            });
        }
        Ok(embeddings)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding_format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let provider = RemoteEmbeddings::new("test-key");
        assert_eq!(provider.dimension(), DEFAULT_DIMENSION);
        assert_eq!(provider.model, DEFAULT_MODEL);
    }

    #[test]
    fn builder_overrides() {
        let provider = RemoteEmbeddings::new("test-key")
            .with_model("text-embedding-3-large")
            .with_dimension(512)
            .with_base_url("http://localhost:8080/v1");
        assert_eq!(provider.dimension(), 512);
        assert_eq!(provider.model, "text-embedding-3-large");
        assert_eq!(provider.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn response_parses_unordered_indices() {
        let raw = r#"{"data":[
            {"index":1,"embedding":[0.2]},
            {"index":0,"embedding":[0.1]}
        ]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data.len(), 2);
    }
}
