//! Provider traits implemented by external collaborators.

use async_trait::async_trait;

use crate::error::Result;

/// Embedding provider producing fixed-dimension dense vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Dimension of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results
            .pop()
            .ok_or_else(|| crate::error::IndexErr::EmbeddingFailed {
                cause: "empty response".to_string(),
            })
    }

    /// Embed a batch of texts; the result preserves input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
