//! Chunker interface.
//!
//! The AST chunker (tree-sitter based) lives outside this crate; the core
//! treats it as a pure function from file content to chunks. The feeder
//! dispatches calls onto a bounded blocking pool, so implementations only
//! need to be `Send + Sync`.

use std::path::Path;

use crate::error::Result;
use crate::types::Chunk;
use crate::types::ChunkMetadata;
use crate::types::ChunkType;

/// Pure chunking function over one file.
pub trait Chunker: Send + Sync {
    /// Split `content` into chunks with 1-based line ranges.
    ///
    /// `chunk_index` values must be dense and ordered; `file_path` and
    /// `language` are carried into each chunk's metadata.
    fn chunk(&self, file_path: &Path, content: &str, language: &str) -> Result<Vec<Chunk>>;
}

/// Fixed-window fallback chunker.
///
/// Used in tests and for files the AST chunker rejects: splits on line
/// windows, emits `Block` chunks, never looks at syntax.
#[derive(Debug, Clone)]
pub struct LineWindowChunker {
    window_lines: usize,
}

impl LineWindowChunker {
    pub fn new(window_lines: usize) -> Self {
        Self {
            window_lines: window_lines.max(1),
        }
    }
}

impl Default for LineWindowChunker {
    fn default() -> Self {
        Self::new(100)
    }
}

impl Chunker for LineWindowChunker {
    fn chunk(&self, file_path: &Path, content: &str, language: &str) -> Result<Vec<Chunk>> {
        let lines: Vec<&str> = content.lines().collect();
        let mut chunks = Vec::new();

        for (index, window) in lines.chunks(self.window_lines).enumerate() {
            let text = window.join("\n");
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            let start_line = (index * self.window_lines + 1) as u32;
            let end_line = (index * self.window_lines + window.len()) as u32;
            chunks.push(Chunk {
                content: trimmed.to_string(),
                start_line,
                end_line,
                line_ranges: None,
                metadata: ChunkMetadata {
                    file_path: file_path.to_path_buf(),
                    language: language.to_string(),
                    chunk_index: chunks.len() as u32,
                    chunk_type: ChunkType::Block,
                    name: None,
                    parent_name: None,
                    parent_type: None,
                    symbol_id: None,
                    is_documentation: false,
                },
            });
        }

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn splits_on_window_boundaries() {
        let content = (1..=250).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let chunker = LineWindowChunker::new(100);
        let chunks = chunker
            .chunk(&PathBuf::from("/repo/a.rs"), &content, "rust")
            .unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 100);
        assert_eq!(chunks[2].start_line, 201);
        assert_eq!(chunks[2].end_line, 250);
        assert!(chunks.iter().all(|c| c.is_well_formed()));
        assert_eq!(chunks[1].metadata.chunk_index, 1);
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        let chunker = LineWindowChunker::default();
        let chunks = chunker
            .chunk(&PathBuf::from("/repo/empty.rs"), "", "rust")
            .unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn blank_windows_are_skipped() {
        let chunker = LineWindowChunker::new(2);
        let chunks = chunker
            .chunk(&PathBuf::from("/repo/a.rs"), "fn a() {}\n\n\n\nfn b() {}", "rust")
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "fn a() {}");
        assert_eq!(chunks[1].content, "fn b() {}");
    }
}
