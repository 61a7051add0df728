//! Core data types for the indexing system.

use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use md5::Md5;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use uuid::Uuid;

/// Reserved point id carrying the collection lifecycle payload.
pub const METADATA_POINT_ID: &str = "__indexing_metadata__";

/// Derive the deterministic collection name for a codebase path.
///
/// `code_<first 8 hex chars of md5(absolute path)>`.
pub fn collection_name_for_path(path: &Path) -> String {
    let digest = Md5::digest(path.to_string_lossy().as_bytes());
    format!("code_{}", &hex::encode(digest)[..8])
}

/// Extension -> language table.
///
/// The scanner's default allow-list is exactly the keys of this table,
/// so what gets indexed and what gets a language name cannot drift.
const LANGUAGE_TABLE: &[(&str, &str)] = &[
    ("rs", "rust"),
    ("go", "go"),
    ("py", "python"),
    ("java", "java"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("cc", "cpp"),
    ("cxx", "cpp"),
    ("hpp", "cpp"),
    ("cs", "csharp"),
    ("rb", "ruby"),
    ("php", "php"),
    ("swift", "swift"),
    ("kt", "kotlin"),
    ("kts", "kotlin"),
    ("scala", "scala"),
    ("lua", "lua"),
    ("sh", "bash"),
    ("sql", "sql"),
    ("md", "markdown"),
    ("json", "json"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("toml", "toml"),
    ("vue", "vue"),
    ("svelte", "svelte"),
];

/// Language of a file, by extension; `None` for anything outside the
/// indexable set.
pub fn detect_language(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    LANGUAGE_TABLE
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, language)| (*language).to_string())
}

/// Default extension allow-list for the scanner: the language table's keys.
pub fn default_extensions() -> Vec<String> {
    LANGUAGE_TABLE
        .iter()
        .map(|(ext, _)| (*ext).to_string())
        .collect()
}

/// Kind of syntactic unit a chunk covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Function,
    Class,
    Interface,
    Block,
}

/// A closed 1-based line interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

/// Chunk metadata emitted by the external chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Absolute path of the source file.
    pub file_path: PathBuf,
    pub language: String,
    /// Position of this chunk within its file.
    pub chunk_index: u32,
    pub chunk_type: ChunkType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_id: Option<String>,
    #[serde(default)]
    pub is_documentation: bool,
}

/// A semantically meaningful slice of a source file.
///
/// Invariants: `start_line <= end_line`; `line_ranges`, when present, is
/// sorted and non-overlapping (used for "class body minus methods" chunks).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Trimmed UTF-8 content.
    pub content: String,
    /// 1-based inclusive.
    pub start_line: u32,
    /// 1-based inclusive.
    pub end_line: u32,
    /// Disjoint intervals for non-contiguous block chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_ranges: Option<Vec<LineRange>>,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// First 16 hex chars of the SHA-256 of the content.
    pub fn content_hash(&self) -> String {
        let digest = Sha256::digest(self.content.as_bytes());
        hex::encode(digest)[..16].to_string()
    }

    /// Check the line invariants.
    pub fn is_well_formed(&self) -> bool {
        if self.start_line > self.end_line {
            return false;
        }
        match &self.line_ranges {
            None => true,
            Some(ranges) => ranges.windows(2).all(|w| w[0].end < w[1].start)
                && ranges.iter().all(|r| r.start <= r.end),
        }
    }
}

/// Deterministic point identifier.
///
/// `sha256(relative_path || chunk_index || content_hash)` truncated to a
/// UUID-compatible representation; stable across reruns while the content
/// is unchanged.
pub fn chunk_point_id(relative_path: &str, chunk_index: u32, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(relative_path.as_bytes());
    hasher.update(chunk_index.to_string().as_bytes());
    hasher.update(content_hash.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// Sparse lexical vector for hybrid search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

/// The stored unit in the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse_vector: Option<SparseVector>,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Structured in-memory form of a chunk payload.
///
/// The vector store sees an opaque key-value map; this struct is the single
/// typed representation, serialized through `to_payload_map`. Optional
/// sections (`git`, `chunk*`) arrive later via payload merges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPayload {
    pub content: String,
    pub relative_path: String,
    pub file_extension: String,
    pub language: String,
    pub start_line: u32,
    pub end_line: u32,
    pub chunk_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_type: Option<ChunkType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_documentation: bool,
    /// File-level git signals, merged in by enrichment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<FileMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_commit_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_churn_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_contributor_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_bug_fix_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_last_modified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_age_days: Option<f64>,
}

impl ChunkPayload {
    /// Build the initial payload for a freshly chunked file.
    pub fn from_chunk(chunk: &Chunk, relative_path: &str) -> Self {
        let file_extension = chunk
            .metadata
            .file_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();
        Self {
            content: chunk.content.clone(),
            relative_path: relative_path.to_string(),
            file_extension,
            language: chunk.metadata.language.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            chunk_index: chunk.metadata.chunk_index,
            chunk_type: Some(chunk.metadata.chunk_type),
            name: chunk.metadata.name.clone(),
            parent_name: chunk.metadata.parent_name.clone(),
            symbol_id: chunk.metadata.symbol_id.clone(),
            is_documentation: chunk.metadata.is_documentation,
            ..Default::default()
        }
    }

    /// Serialize to the opaque map the vector store accepts.
    pub fn to_payload_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

/// Aggregated per-file git signals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub dominant_author: String,
    /// Share of commits by the dominant author, 0-100.
    pub dominant_author_pct: f64,
    pub authors: Vec<String>,
    pub contributor_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_created_at: Option<DateTime<Utc>>,
    pub age_days: f64,
    pub commit_count: u32,
    pub lines_added: u64,
    pub lines_deleted: u64,
    /// Total lines changed / current LOC.
    pub relative_churn: f64,
    /// Commits decayed by age.
    pub recency_weighted_freq: f64,
    /// Churn per KLOC.
    pub change_density: f64,
    /// Std-dev of monthly churn.
    pub churn_volatility: f64,
    /// Percent of commits whose message matches a bug-fix pattern.
    pub bug_fix_rate: f64,
    pub task_ids: Vec<String>,
}

/// Chunk-level overlay computed from line-restricted history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkOverlay {
    pub chunk_commit_count: u32,
    pub chunk_churn_ratio: f64,
    pub chunk_contributor_count: u32,
    pub chunk_bug_fix_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_last_modified_at: Option<DateTime<Utc>>,
    pub chunk_age_days: f64,
}

impl ChunkOverlay {
    /// Serialize to a payload map for a merge write.
    pub fn to_payload_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

/// Lifecycle payload stored on the reserved metadata point.
///
/// Every write is a merge so that concurrent writers (indexing completion
/// vs enrichment completion) cannot clobber each other's sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingMarker {
    /// `None` means "leave the stored flag alone" on a merge write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexing_complete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_enrichment: Option<ChunkEnrichmentMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
}

/// Enrichment lifecycle section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentMarker {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub matched_files: u64,
    #[serde(default)]
    pub missed_files: u64,
    #[serde(default)]
    pub git_log_file_count: u64,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Chunk-overlay lifecycle section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEnrichmentMarker {
    pub status: String,
    #[serde(default)]
    pub overlays_applied: u64,
    #[serde(default)]
    pub duration_ms: u64,
}

impl IndexingMarker {
    /// Serialize to a payload map for a merge write.
    pub fn to_payload_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

/// How enrichment finished relative to the index run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentOutcome {
    Completed,
    Background,
    Skipped,
}

/// Structured result of `index_codebase`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub files_scanned: u64,
    pub files_indexed: u64,
    pub chunks_created: u64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub enrichment_status: EnrichmentOutcome,
}

/// Structured result of `reindex_changes`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReindexStats {
    pub files_added: u64,
    pub files_modified: u64,
    pub files_deleted: u64,
    pub chunks_created: u64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Index lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    NotIndexed,
    Indexing,
    Indexed,
}

/// Result of `get_index_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatus {
    pub state: IndexState,
    /// Stored points minus the reserved metadata point.
    pub point_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_enrichment: Option<ChunkEnrichmentMarker>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_chunk(content: &str, start: u32, end: u32) -> Chunk {
        Chunk {
            content: content.to_string(),
            start_line: start,
            end_line: end,
            line_ranges: None,
            metadata: ChunkMetadata {
                file_path: PathBuf::from("/repo/src/user.ts"),
                language: "typescript".to_string(),
                chunk_index: 0,
                chunk_type: ChunkType::Function,
                name: Some("getUser".to_string()),
                parent_name: Some("UserService".to_string()),
                parent_type: Some("class".to_string()),
                symbol_id: None,
                is_documentation: false,
            },
        }
    }

    #[test]
    fn collection_name_is_deterministic() {
        let a = collection_name_for_path(Path::new("/home/user/project"));
        let b = collection_name_for_path(Path::new("/home/user/project"));
        let c = collection_name_for_path(Path::new("/home/user/other"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("code_"));
        assert_eq!(a.len(), "code_".len() + 8);
    }

    #[test]
    fn language_detection_follows_the_allow_list() {
        assert_eq!(detect_language(Path::new("a.ts")).as_deref(), Some("typescript"));
        assert_eq!(detect_language(Path::new("a.TSX")).as_deref(), Some("typescript"));
        assert_eq!(detect_language(Path::new("c.vue")).as_deref(), Some("vue"));
        assert_eq!(detect_language(Path::new("img.png")), None);
        assert_eq!(detect_language(Path::new("Makefile")), None);

        // Every default extension resolves to a language, since both come
        // from the same table.
        for ext in default_extensions() {
            let path = PathBuf::from(format!("file.{ext}"));
            assert!(detect_language(&path).is_some(), "no language for .{ext}");
        }
    }

    #[test]
    fn point_id_is_stable_and_uuid_shaped() {
        let id1 = chunk_point_id("src/user.ts", 0, "abcd1234abcd1234");
        let id2 = chunk_point_id("src/user.ts", 0, "abcd1234abcd1234");
        let id3 = chunk_point_id("src/user.ts", 1, "abcd1234abcd1234");
        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
        assert!(Uuid::parse_str(&id1).is_ok());
    }

    #[test]
    fn content_hash_tracks_content() {
        let a = make_chunk("fn a() {}", 1, 1);
        let b = make_chunk("fn a() {}", 5, 5);
        let c = make_chunk("fn b() {}", 1, 1);
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
        assert_eq!(a.content_hash().len(), 16);
    }

    #[test]
    fn line_range_invariants() {
        let mut chunk = make_chunk("class body", 1, 40);
        assert!(chunk.is_well_formed());

        chunk.line_ranges = Some(vec![
            LineRange { start: 1, end: 3 },
            LineRange { start: 10, end: 40 },
        ]);
        assert!(chunk.is_well_formed());

        chunk.line_ranges = Some(vec![
            LineRange { start: 1, end: 12 },
            LineRange { start: 10, end: 40 },
        ]);
        assert!(!chunk.is_well_formed());

        chunk.line_ranges = None;
        chunk.start_line = 50;
        assert!(!chunk.is_well_formed());
    }

    #[test]
    fn payload_map_uses_camel_case_keys() {
        let chunk = make_chunk("fn a() {}", 3, 7);
        let payload = ChunkPayload::from_chunk(&chunk, "src/user.ts");
        let map = payload.to_payload_map();

        assert_eq!(map["relativePath"], "src/user.ts");
        assert_eq!(map["fileExtension"], "ts");
        assert_eq!(map["startLine"], 3);
        assert_eq!(map["endLine"], 7);
        assert!(!map.contains_key("git"));
        assert!(!map.contains_key("chunkCommitCount"));
    }

    #[test]
    fn marker_serializes_only_present_sections() {
        let marker = IndexingMarker {
            indexing_complete: Some(true),
            ..Default::default()
        };
        let map = marker.to_payload_map();
        assert_eq!(map["indexingComplete"], true);
        assert!(!map.contains_key("enrichment"));
        assert!(!map.contains_key("chunkEnrichment"));

        // A section-only write must not carry the completion flag, or a
        // merge would clobber a concurrent writer's value.
        let section = IndexingMarker {
            enrichment: Some(EnrichmentMarker {
                status: "in_progress".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let map = section.to_payload_map();
        assert!(!map.contains_key("indexingComplete"));
        assert_eq!(map["enrichment"]["status"], "in_progress");
    }

    #[test]
    fn overlay_map_has_chunk_prefixed_keys() {
        let overlay = ChunkOverlay {
            chunk_commit_count: 4,
            chunk_churn_ratio: 1.5,
            chunk_contributor_count: 2,
            chunk_bug_fix_rate: 25.0,
            chunk_last_modified_at: None,
            chunk_age_days: 10.0,
        };
        let map = overlay.to_payload_map();
        assert_eq!(map["chunkCommitCount"], 4);
        assert_eq!(map["chunkContributorCount"], 2);
        assert!(!map.contains_key("chunkLastModifiedAt"));
    }
}
