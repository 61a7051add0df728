//! File ignore service shared by the tea-rags tools.
//!
//! Indexing and git-history enrichment must agree on which files count:
//! the scanner decides what gets chunked, and the enrichment pass filters
//! `git log` output with the same rules so that excluded files are never
//! reported as "missed". Both consume this crate.
//!
//! The filter is layered, from lowest to highest precedence:
//! 1. Built-in patterns (dependency dirs, build output, VCS internals)
//! 2. `.gitignore` files (root and nested)
//! 3. The project ignore file (`.tearagsignore` by default)
//! 4. Caller-supplied extra patterns

use std::path::Path;
use std::path::PathBuf;

use globset::Glob;
use globset::GlobSet;
use globset::GlobSetBuilder;
use ignore::WalkBuilder;
use ignore::gitignore::Gitignore;
use ignore::gitignore::GitignoreBuilder;
use ignore::overrides::OverrideBuilder;
use walkdir::WalkDir;

/// Default name of the project-specific ignore file.
pub const PROJECT_IGNORE_FILE: &str = ".tearagsignore";

/// Patterns that are always excluded, regardless of `.gitignore` contents.
pub const BUILTIN_IGNORE_PATTERNS: &[&str] = &[
    ".git/",
    "node_modules/",
    "target/",
    "dist/",
    "build/",
    "out/",
    "coverage/",
    "__pycache__/",
    ".venv/",
    "venv/",
    ".idea/",
    ".vscode/",
    ".next/",
    ".nuxt/",
    "*.min.js",
    "*.map",
    ".DS_Store",
];

/// Ignore source configuration.
#[derive(Debug, Clone)]
pub struct IgnoreConfig {
    /// Whether to honour `.gitignore` files.
    pub respect_gitignore: bool,
    /// Whether to honour the project ignore file.
    pub respect_project_ignore: bool,
    /// Name of the project ignore file.
    pub project_ignore_file: String,
    /// Caller-supplied patterns in gitignore syntax.
    pub extra_patterns: Vec<String>,
}

impl IgnoreConfig {
    /// Configuration that honours every ignore source.
    pub fn respecting_all() -> Self {
        Self {
            respect_gitignore: true,
            respect_project_ignore: true,
            project_ignore_file: PROJECT_IGNORE_FILE.to_string(),
            extra_patterns: Vec::new(),
        }
    }

    /// Add caller-supplied patterns on top of the configured sources.
    pub fn with_extra_patterns(mut self, patterns: &[String]) -> Self {
        self.extra_patterns.extend(patterns.iter().cloned());
        self
    }
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self::respecting_all()
    }
}

/// Shared ignore service.
///
/// Produces directory walkers for the scanner and standalone matchers for
/// subsystems that test paths without walking (git-log filtering).
#[derive(Debug, Clone)]
pub struct IgnoreService {
    config: IgnoreConfig,
}

impl IgnoreService {
    /// Create a new service from the given configuration.
    pub fn new(config: IgnoreConfig) -> Self {
        Self { config }
    }

    /// Access the underlying configuration.
    pub fn config(&self) -> &IgnoreConfig {
        &self.config
    }

    /// Create a configured `WalkBuilder` rooted at `root`.
    ///
    /// Built-ins and extra patterns are installed as overrides; invalid
    /// patterns are skipped the way git skips malformed ignore lines.
    pub fn create_walk_builder(&self, root: &Path) -> WalkBuilder {
        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(true)
            .git_ignore(self.config.respect_gitignore)
            .git_global(false)
            .git_exclude(self.config.respect_gitignore)
            .require_git(false)
            .follow_links(false);

        if self.config.respect_project_ignore {
            builder.add_custom_ignore_filename(&self.config.project_ignore_file);
        }

        let mut overrides = OverrideBuilder::new(root);
        for pattern in BUILTIN_IGNORE_PATTERNS
            .iter()
            .map(|p| (*p).to_string())
            .chain(self.config.extra_patterns.iter().cloned())
        {
            // Overrides whitelist by default; "!" marks an ignore pattern.
            let _ = overrides.add(&format!("!{pattern}"));
        }
        if let Ok(overrides) = overrides.build() {
            builder.overrides(overrides);
        }

        builder
    }

    /// Build a standalone matcher with the same rules the walker applies.
    ///
    /// Collects the root and nested `.gitignore` files plus the project
    /// ignore file so that relative paths can be tested without touching
    /// the filesystem afterwards.
    pub fn build_matcher(&self, root: &Path) -> PathMatcher {
        let mut gitignore = GitignoreBuilder::new(root);

        for pattern in BUILTIN_IGNORE_PATTERNS {
            let _ = gitignore.add_line(None, pattern);
        }
        for pattern in &self.config.extra_patterns {
            let _ = gitignore.add_line(None, pattern);
        }

        if self.config.respect_gitignore || self.config.respect_project_ignore {
            for entry in WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| !is_vcs_internal(e.path()))
                .filter_map(|e| e.ok())
            {
                let name = entry.file_name().to_string_lossy();
                let is_gitignore = self.config.respect_gitignore && name == ".gitignore";
                let is_project = self.config.respect_project_ignore
                    && name == self.config.project_ignore_file.as_str();
                if is_gitignore || is_project {
                    let _ = gitignore.add(entry.path());
                }
            }
        }

        PathMatcher {
            root: root.to_path_buf(),
            gitignore: gitignore.build().unwrap_or_else(|_| Gitignore::empty()),
            extras: build_globset(&self.config.extra_patterns),
        }
    }
}

fn is_vcs_internal(path: &Path) -> bool {
    path.file_name().is_some_and(|n| n == ".git")
}

fn build_globset(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        // Bare names like "node_modules" should match at any depth.
        let widened = if pattern.contains('/') {
            pattern.clone()
        } else {
            format!("**/{pattern}")
        };
        if let Ok(glob) = Glob::new(&widened) {
            builder.add(glob);
        }
        if let Ok(glob) = Glob::new(&format!("{widened}/**")) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

/// Standalone path matcher carrying the full layered rule set.
#[derive(Debug)]
pub struct PathMatcher {
    root: PathBuf,
    gitignore: Gitignore,
    extras: GlobSet,
}

impl PathMatcher {
    /// Check whether `path` (absolute or root-relative) is ignored.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        if self
            .gitignore
            .matched_path_or_any_parents(rel, false)
            .is_ignore()
        {
            return true;
        }
        self.extras.is_match(rel)
    }

    /// Root this matcher was built for.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
