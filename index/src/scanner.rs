//! File scanner.
//!
//! Walks the codebase root with the layered ignore filter and an extension
//! allow-list, producing a deterministic (sorted) list of absolute paths.
//! The underlying `IgnoreService` is exposed so the enrichment subsystem
//! can filter `git log` output with identical rules.

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use tearags_file_ignore::IgnoreConfig;
use tearags_file_ignore::IgnoreService;
use tearags_file_ignore::PathMatcher;

use crate::error::IndexErr;
use crate::error::Result;
use crate::types::default_extensions;

/// Directory walker for indexing candidates.
pub struct FileScanner {
    root: PathBuf,
    ignore_service: IgnoreService,
    extensions: HashSet<String>,
    max_file_size: u64,
}

impl FileScanner {
    /// Create a scanner with the default extension allow-list.
    pub fn new(root: &Path, extra_ignore_patterns: &[String], max_file_size: u64) -> Result<Self> {
        Self::with_extensions(
            root,
            extra_ignore_patterns,
            max_file_size,
            &default_extensions(),
        )
    }

    /// Create a scanner with a custom extension allow-list.
    pub fn with_extensions(
        root: &Path,
        extra_ignore_patterns: &[String],
        max_file_size: u64,
        extensions: &[String],
    ) -> Result<Self> {
        if !root.is_dir() {
            return Err(IndexErr::InvalidPath {
                path: root.display().to_string(),
                cause: "not a directory".to_string(),
            });
        }
        let config = IgnoreConfig::respecting_all().with_extra_patterns(extra_ignore_patterns);
        Ok(Self {
            root: root.to_path_buf(),
            ignore_service: IgnoreService::new(config),
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
            max_file_size,
        })
    }

    /// The shared ignore service.
    pub fn ignore_service(&self) -> &IgnoreService {
        &self.ignore_service
    }

    /// Standalone matcher with the scanner's exact rules.
    pub fn matcher(&self) -> PathMatcher {
        self.ignore_service.build_matcher(&self.root)
    }

    /// Walk the root and return sorted absolute candidate paths.
    ///
    /// Symlinks that resolve outside the root are skipped; duplicate
    /// targets (symlink plus real file) are reported once.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        let canonical_root = self.root.canonicalize()?;
        let mut files = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        for entry in self.ignore_service.create_walk_builder(&self.root).build() {
            let entry = match entry {
                Ok(e) => e,
                Err(error) => {
                    tracing::debug!(error = %error, "skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            if entry.file_type().is_none_or(|t| t.is_dir()) {
                continue;
            }

            if !self.extension_allowed(path) {
                continue;
            }

            let resolved = if path.is_symlink() {
                match path.canonicalize() {
                    Ok(target) if target.starts_with(&canonical_root) && target.is_file() => target,
                    _ => continue,
                }
            } else {
                path.to_path_buf()
            };

            if let Ok(metadata) = resolved.metadata()
                && metadata.len() > self.max_file_size
            {
                tracing::debug!(path = %path.display(), "skipping oversized file");
                continue;
            }

            if !seen.insert(resolved) {
                continue;
            }
            files.push(path.to_path_buf());
        }

        files.sort();
        Ok(files)
    }

    fn extension_allowed(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_lowercase()))
    }
}
