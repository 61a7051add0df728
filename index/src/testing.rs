//! Test support: deterministic stand-ins for the external collaborators.
//!
//! Used by the crate's own tests and by downstream integration tests; no
//! production code path constructs these.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sha2::Digest;
use sha2::Sha256;

use crate::error::Result;
use crate::traits::EmbeddingProvider;
use crate::types::Chunk;
use crate::types::ChunkMetadata;
use crate::types::ChunkType;
use crate::types::detect_language;

/// Deterministic embedding provider.
///
/// Hashes the text into a unit vector, so identical content always
/// embeds identically and similar-content lookups in tests are exact.
#[derive(Debug, Clone)]
pub struct StubEmbedder {
    dimension: usize,
    delay: Duration,
}

impl StubEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            delay: Duration::ZERO,
        }
    }

    /// Add artificial latency per batch (for backpressure/overlap tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut vector: Vec<f32> = (0..self.dimension)
            .map(|i| f32::from(digest[i % digest.len()]) / 255.0)
            .collect();
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Build a one-off function chunk for tests.
pub fn chunk_for(file_path: &Path, content: &str, chunk_index: u32) -> Chunk {
    let lines = content.lines().count().max(1) as u32;
    Chunk {
        content: content.to_string(),
        start_line: 1,
        end_line: lines,
        line_ranges: None,
        metadata: ChunkMetadata {
            file_path: file_path.to_path_buf(),
            language: detect_language(file_path).unwrap_or_default(),
            chunk_index,
            chunk_type: ChunkType::Function,
            name: None,
            parent_name: None,
            parent_type: None,
            symbol_id: None,
            is_documentation: false,
        },
    }
}
