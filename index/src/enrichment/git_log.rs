//! Git subprocess plumbing for enrichment.
//!
//! All reads go through `git` itself: one `--numstat` log for the whole
//! recent history, an unbounded log over specific paths for backfill, and
//! line-restricted logs (`-L`) for chunk churn. Every invocation carries
//! a timeout; the child is killed when the timeout fires.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use chrono::DateTime;
use chrono::Duration as ChronoDuration;
use chrono::Utc;

use super::stats::CommitInfo;
use super::stats::FileChurnData;
use crate::error::IndexErr;
use crate::error::Result;

/// Per-file churn map keyed by repo-relative path.
pub type ChurnMap = HashMap<String, FileChurnData>;

/// Approximate month length used for `--since` bounds.
const DAYS_PER_MONTH: i64 = 30;

/// Resolve the actual repository root for `path`.
///
/// May differ from the indexed path because of symlinks, worktrees, or
/// indexing a subdirectory of the repository.
pub async fn resolve_repo_root(path: &Path, timeout: Duration) -> Result<PathBuf> {
    let stdout = run_git(path, &["rev-parse", "--show-toplevel"], timeout).await?;
    let root = stdout.trim();
    if root.is_empty() {
        return Err(IndexErr::git("rev-parse", "empty toplevel"));
    }
    Ok(PathBuf::from(root))
}

/// Read the complete file -> churn map restricted to recent history.
pub async fn read_churn_map(
    repo_root: &Path,
    since_months: u32,
    timeout: Duration,
) -> Result<ChurnMap> {
    let since = (Utc::now() - ChronoDuration::days(i64::from(since_months) * DAYS_PER_MONTH))
        .format("%Y-%m-%d")
        .to_string();
    let args = [
        "-c",
        "core.quotepath=false",
        "log",
        "--numstat",
        "--no-merges",
        "--since",
        since.as_str(),
        "--pretty=format:%H|%an|%aI|%s",
    ];
    let stdout = run_git(repo_root, &args, timeout).await?;
    Ok(parse_numstat_log(&stdout))
}

/// Backfill read: full history over exactly the given paths.
pub async fn read_churn_map_for_paths(
    repo_root: &Path,
    paths: &[String],
    timeout: Duration,
) -> Result<ChurnMap> {
    if paths.is_empty() {
        return Ok(ChurnMap::new());
    }
    let mut args: Vec<&str> = vec![
        "-c",
        "core.quotepath=false",
        "log",
        "--numstat",
        "--no-merges",
        "--pretty=format:%H|%an|%aI|%s",
        "--",
    ];
    args.extend(paths.iter().map(String::as_str));
    let stdout = run_git(repo_root, &args, timeout).await?;
    Ok(parse_numstat_log(&stdout))
}

/// Commits touching one line range of one file.
pub async fn read_line_history(
    repo_root: &Path,
    rel_path: &str,
    start_line: u32,
    end_line: u32,
    timeout: Duration,
) -> Result<FileChurnData> {
    let range = format!("-L{},{}:{rel_path}", start_line.max(1), end_line.max(1));
    let args = [
        "-c",
        "core.quotepath=false",
        "log",
        range.as_str(),
        "--pretty=format:%H|%an|%aI|%s",
    ];
    let stdout = run_git(repo_root, &args, timeout).await?;
    Ok(parse_line_log(&stdout))
}

async fn run_git(dir: &Path, args: &[&str], timeout: Duration) -> Result<String> {
    let command_name = args
        .iter()
        .find(|a| !a.starts_with('-') && **a != "core.quotepath=false")
        .copied()
        .unwrap_or("git");

    let child = tokio::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| IndexErr::GitTimeout {
            command: command_name.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })?
        .map_err(|e| IndexErr::git(command_name, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(IndexErr::git(command_name, stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `--numstat` log output into the per-file churn map.
fn parse_numstat_log(log: &str) -> ChurnMap {
    let mut map = ChurnMap::new();
    let mut current: Option<CommitInfo> = None;

    for line in log.lines() {
        if line.is_empty() {
            continue;
        }
        if let Some(header) = parse_commit_header(line) {
            current = Some(header);
            continue;
        }
        let Some(commit) = &current else { continue };
        if let Some((added, deleted, path)) = parse_numstat_line(line) {
            let entry = map.entry(path).or_default();
            entry.commits.push(CommitInfo {
                lines_added: added,
                lines_deleted: deleted,
                ..commit.clone()
            });
        }
    }
    map
}

/// Parse `git log -L` output: headers plus unified diff bodies.
fn parse_line_log(log: &str) -> FileChurnData {
    let mut data = FileChurnData::default();

    for line in log.lines() {
        if let Some(header) = parse_commit_header(line) {
            data.commits.push(header);
            continue;
        }
        let Some(commit) = data.commits.last_mut() else {
            continue;
        };
        if line.starts_with('+') && !line.starts_with("+++") {
            commit.lines_added += 1;
        } else if line.starts_with('-') && !line.starts_with("---") {
            commit.lines_deleted += 1;
        }
    }
    data
}

/// `<40-hex>|author|iso-date|subject`
fn parse_commit_header(line: &str) -> Option<CommitInfo> {
    let mut parts = line.splitn(4, '|');
    let hash = parts.next()?;
    if hash.len() != 40 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let author = parts.next()?;
    let date = parts.next()?;
    let message = parts.next().unwrap_or("");
    let timestamp = DateTime::parse_from_rfc3339(date).ok()?.with_timezone(&Utc);
    Some(CommitInfo {
        hash: hash.to_string(),
        author: author.to_string(),
        timestamp,
        message: message.to_string(),
        lines_added: 0,
        lines_deleted: 0,
    })
}

/// `added\tdeleted\tpath` with `-` for binary files.
fn parse_numstat_line(line: &str) -> Option<(u64, u64, String)> {
    let mut parts = line.splitn(3, '\t');
    let added = parts.next()?;
    let deleted = parts.next()?;
    let path = parts.next()?;

    let added = if added == "-" { 0 } else { added.parse().ok()? };
    let deleted = if deleted == "-" { 0 } else { deleted.parse().ok()? };
    Some((added, deleted, normalize_rename(path)))
}

/// Collapse git's rename notation to the post-rename path.
///
/// `src/{old => new}/f.ts` and `old.ts => new.ts` both resolve to the
/// new name, which is the one the scanner sees on disk.
fn normalize_rename(path: &str) -> String {
    if let (Some(open), Some(close)) = (path.find('{'), path.find('}')) {
        if open < close {
            let inside = &path[open + 1..close];
            if let Some((_, new)) = inside.split_once(" => ") {
                let joined = format!("{}{}{}", &path[..open], new, &path[close + 1..]);
                return joined.replace("//", "/");
            }
        }
    }
    if let Some((_, new)) = path.split_once(" => ") {
        return new.to_string();
    }
    path.to_string()
}
