//! Pure aggregation of per-file commit history into search signals.
//!
//! Everything here is a function of the commit list plus a "now" instant;
//! no git, no IO. The enrichment pass feeds it the parsed `git log
//! --numstat` output and writes the result into point payloads.

use std::collections::HashMap;

use chrono::DateTime;
use chrono::Datelike;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::FileMetadata;

/// Half-life, in days, for the recency-weighted commit frequency.
const RECENCY_HALF_LIFE_DAYS: f64 = 30.0;

/// Cap on extracted task ids per file.
const MAX_TASK_IDS: usize = 20;

static BUG_FIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(fix(es|ed)?|bug|hotfix|patch|defect|fault|crash|regression|broken)\b")
        .unwrap_or_else(|_| Regex::new("$^").unwrap())
});

static TASK_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z][A-Z0-9]{1,9}-\d+)\b|#(\d+)").unwrap_or_else(|_| Regex::new("$^").unwrap())
});

/// One commit touching one file.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    /// Subject line of the commit message.
    pub message: String,
    pub lines_added: u64,
    pub lines_deleted: u64,
}

/// Raw commit list for one file.
#[derive(Debug, Clone, Default)]
pub struct FileChurnData {
    pub commits: Vec<CommitInfo>,
}

impl FileChurnData {
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

/// Aggregate a commit list into payload-ready signals.
///
/// `current_loc` is the file's current line count (the callers use the
/// maximum chunk end line as a proxy).
pub fn compute_file_metadata(
    data: &FileChurnData,
    current_loc: u32,
    now: DateTime<Utc>,
) -> FileMetadata {
    if data.commits.is_empty() {
        return FileMetadata::default();
    }

    let commit_count = data.commits.len() as u32;
    let lines_added: u64 = data.commits.iter().map(|c| c.lines_added).sum();
    let lines_deleted: u64 = data.commits.iter().map(|c| c.lines_deleted).sum();
    let total_changed = lines_added + lines_deleted;
    let loc = u64::from(current_loc.max(1));

    let mut by_author: HashMap<&str, u32> = HashMap::new();
    for commit in &data.commits {
        *by_author.entry(commit.author.as_str()).or_default() += 1;
    }
    let mut authors: Vec<(&str, u32)> = by_author.into_iter().collect();
    authors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let (dominant_author, dominant_commits) = authors[0];
    let dominant_author_pct = f64::from(dominant_commits) / f64::from(commit_count) * 100.0;

    let first_created_at = data.commits.iter().map(|c| c.timestamp).min();
    let last_modified_at = data.commits.iter().map(|c| c.timestamp).max();
    let age_days = first_created_at
        .map(|first| (now - first).num_seconds() as f64 / 86_400.0)
        .unwrap_or(0.0)
        .max(0.0);

    let recency_weighted_freq = data
        .commits
        .iter()
        .map(|c| {
            let commit_age_days = ((now - c.timestamp).num_seconds() as f64 / 86_400.0).max(0.0);
            0.5_f64.powf(commit_age_days / RECENCY_HALF_LIFE_DAYS)
        })
        .sum();

    let bug_fixes = data
        .commits
        .iter()
        .filter(|c| BUG_FIX_RE.is_match(&c.message))
        .count() as u32;
    let bug_fix_rate = f64::from(bug_fixes) / f64::from(commit_count) * 100.0;

    FileMetadata {
        dominant_author: dominant_author.to_string(),
        dominant_author_pct,
        authors: authors.iter().map(|(name, _)| (*name).to_string()).collect(),
        contributor_count: authors.len() as u32,
        last_modified_at,
        first_created_at,
        age_days,
        commit_count,
        lines_added,
        lines_deleted,
        relative_churn: total_changed as f64 / loc as f64,
        recency_weighted_freq,
        change_density: total_changed as f64 * 1000.0 / loc as f64,
        churn_volatility: monthly_churn_stddev(data),
        bug_fix_rate,
        task_ids: extract_task_ids(data),
    }
}

/// Aggregate a line-restricted history into the chunk overlay.
///
/// `range_lines` is the chunk's line-range length; commits older than
/// `max_age_months` are excluded so stale history does not dominate.
pub fn compute_chunk_overlay(
    data: &FileChurnData,
    range_lines: u32,
    max_age_months: u32,
    now: DateTime<Utc>,
) -> crate::types::ChunkOverlay {
    let cutoff = now - chrono::Duration::days(i64::from(max_age_months) * 30);
    let commits: Vec<&CommitInfo> = data
        .commits
        .iter()
        .filter(|c| c.timestamp >= cutoff)
        .collect();
    if commits.is_empty() {
        return crate::types::ChunkOverlay::default();
    }

    let commit_count = commits.len() as u32;
    let changed: u64 = commits.iter().map(|c| c.lines_added + c.lines_deleted).sum();
    let mut authors: Vec<&str> = commits.iter().map(|c| c.author.as_str()).collect();
    authors.sort_unstable();
    authors.dedup();

    let bug_fixes = commits
        .iter()
        .filter(|c| BUG_FIX_RE.is_match(&c.message))
        .count() as u32;

    let first = commits.iter().map(|c| c.timestamp).min();
    let last = commits.iter().map(|c| c.timestamp).max();

    crate::types::ChunkOverlay {
        chunk_commit_count: commit_count,
        chunk_churn_ratio: changed as f64 / f64::from(range_lines.max(1)),
        chunk_contributor_count: authors.len() as u32,
        chunk_bug_fix_rate: f64::from(bug_fixes) / f64::from(commit_count) * 100.0,
        chunk_last_modified_at: last,
        chunk_age_days: first
            .map(|f| ((now - f).num_seconds() as f64 / 86_400.0).max(0.0))
            .unwrap_or(0.0),
    }
}

/// Std-dev of per-month changed lines over the spanned months.
///
/// Months with no commits count as zero churn, so a file changed in one
/// burst long ago reads as low-volatility, not constant.
fn monthly_churn_stddev(data: &FileChurnData) -> f64 {
    let month_key = |ts: &DateTime<Utc>| i64::from(ts.year()) * 12 + i64::from(ts.month0());

    let Some(first) = data.commits.iter().map(|c| month_key(&c.timestamp)).min() else {
        return 0.0;
    };
    let last = data
        .commits
        .iter()
        .map(|c| month_key(&c.timestamp))
        .max()
        .unwrap_or(first);

    let mut by_month: HashMap<i64, f64> = HashMap::new();
    for commit in &data.commits {
        *by_month.entry(month_key(&commit.timestamp)).or_default() +=
            (commit.lines_added + commit.lines_deleted) as f64;
    }

    let months = (last - first + 1).max(1) as f64;
    let mean: f64 = by_month.values().sum::<f64>() / months;
    let variance: f64 = (first..=last)
        .map(|m| {
            let churn = by_month.get(&m).copied().unwrap_or(0.0);
            (churn - mean).powi(2)
        })
        .sum::<f64>()
        / months;
    variance.sqrt()
}

/// Issue-tracker references extracted from commit subjects.
fn extract_task_ids(data: &FileChurnData) -> Vec<String> {
    let mut ids = Vec::new();
    for commit in &data.commits {
        for capture in TASK_ID_RE.captures_iter(&commit.message) {
            let id = capture
                .get(1)
                .map(|m| m.as_str().to_string())
                .or_else(|| capture.get(2).map(|m| format!("#{}", m.as_str())));
            if let Some(id) = id
                && !ids.contains(&id)
            {
                ids.push(id);
                if ids.len() >= MAX_TASK_IDS {
                    return ids;
                }
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn commit(author: &str, days_ago: i64, message: &str, added: u64, deleted: u64) -> CommitInfo {
        CommitInfo {
            hash: format!("{days_ago:040}"),
            author: author.to_string(),
            timestamp: Utc::now() - Duration::days(days_ago),
            message: message.to_string(),
            lines_added: added,
            lines_deleted: deleted,
        }
    }

    #[test]
    fn empty_history_is_default() {
        let meta = compute_file_metadata(&FileChurnData::default(), 100, Utc::now());
        assert_eq!(meta, FileMetadata::default());
    }

    #[test]
    fn dominant_author_and_counts() {
        let data = FileChurnData {
            commits: vec![
                commit("alice", 10, "add feature", 100, 0),
                commit("alice", 8, "refine feature", 20, 10),
                commit("bob", 5, "fix bug in feature", 5, 5),
                commit("alice", 2, "docs", 3, 0),
            ],
        };
        let meta = compute_file_metadata(&data, 120, Utc::now());

        assert_eq!(meta.dominant_author, "alice");
        assert_eq!(meta.commit_count, 4);
        assert_eq!(meta.contributor_count, 2);
        assert!((meta.dominant_author_pct - 75.0).abs() < 1e-9);
        assert_eq!(meta.authors[0], "alice");
        assert_eq!(meta.lines_added, 128);
        assert_eq!(meta.lines_deleted, 15);
    }

    #[test]
    fn churn_ratios_use_current_loc() {
        let data = FileChurnData {
            commits: vec![commit("alice", 1, "rewrite", 150, 50)],
        };
        let meta = compute_file_metadata(&data, 100, Utc::now());
        assert!((meta.relative_churn - 2.0).abs() < 1e-9);
        assert!((meta.change_density - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn bug_fix_rate_matches_patterns() {
        let data = FileChurnData {
            commits: vec![
                commit("a", 1, "Fix crash on startup", 1, 1),
                commit("a", 2, "add tests", 1, 1),
                commit("a", 3, "hotfix for regression", 1, 1),
                commit("a", 4, "refactor module", 1, 1),
            ],
        };
        let meta = compute_file_metadata(&data, 10, Utc::now());
        assert!((meta.bug_fix_rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn recent_commits_weigh_more() {
        let recent = FileChurnData {
            commits: vec![commit("a", 1, "x", 1, 0)],
        };
        let old = FileChurnData {
            commits: vec![commit("a", 300, "x", 1, 0)],
        };
        let now = Utc::now();
        let recent_meta = compute_file_metadata(&recent, 10, now);
        let old_meta = compute_file_metadata(&old, 10, now);
        assert!(recent_meta.recency_weighted_freq > old_meta.recency_weighted_freq);
        assert!(old_meta.recency_weighted_freq < 0.01);
    }

    #[test]
    fn task_ids_are_deduped_and_capped() {
        let data = FileChurnData {
            commits: vec![
                commit("a", 1, "PROJ-42 first pass", 1, 0),
                commit("a", 2, "PROJ-42 follow up, closes #99", 1, 0),
                commit("a", 3, "see TEAM-7", 1, 0),
            ],
        };
        let meta = compute_file_metadata(&data, 10, Utc::now());
        assert_eq!(
            meta.task_ids,
            vec!["PROJ-42".to_string(), "#99".to_string(), "TEAM-7".to_string()]
        );
    }

    #[test]
    fn volatility_zero_for_single_burst() {
        let data = FileChurnData {
            commits: vec![
                commit("a", 3, "x", 10, 0),
                commit("a", 4, "y", 10, 0),
            ],
        };
        let meta = compute_file_metadata(&data, 10, Utc::now());
        // All churn lands in one month (or two adjacent); the spread over
        // the spanned window stays small.
        assert!(meta.churn_volatility < 20.1);
    }

    #[test]
    fn chunk_overlay_filters_old_commits() {
        let data = FileChurnData {
            commits: vec![
                commit("alice", 10, "fix crash in range", 5, 5),
                commit("bob", 20, "extend", 10, 0),
                // Far outside a 6-month window.
                commit("carol", 400, "ancient rewrite", 100, 100),
            ],
        };
        let overlay = compute_chunk_overlay(&data, 20, 6, Utc::now());
        assert_eq!(overlay.chunk_commit_count, 2);
        assert_eq!(overlay.chunk_contributor_count, 2);
        assert!((overlay.chunk_churn_ratio - 1.0).abs() < 1e-9);
        assert!((overlay.chunk_bug_fix_rate - 50.0).abs() < 1e-9);
        assert!(overlay.chunk_age_days > 19.0 && overlay.chunk_age_days < 21.0);
    }

    #[test]
    fn chunk_overlay_empty_when_all_commits_stale() {
        let data = FileChurnData {
            commits: vec![commit("alice", 400, "old", 5, 5)],
        };
        let overlay = compute_chunk_overlay(&data, 20, 6, Utc::now());
        assert_eq!(overlay, crate::types::ChunkOverlay::default());
    }

    #[test]
    fn age_uses_first_commit() {
        let data = FileChurnData {
            commits: vec![
                commit("a", 100, "created", 10, 0),
                commit("a", 1, "tweak", 1, 0),
            ],
        };
        let meta = compute_file_metadata(&data, 10, Utc::now());
        assert!((meta.age_days - 100.0).abs() < 0.1);
        assert!(meta.last_modified_at > meta.first_created_at);
    }
}
