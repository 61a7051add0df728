//! Sharded snapshot persistence.
//!
//! Each shard file holds a partition of the `relative_path -> FileState`
//! map in a compact length-prefixed record format. Shards are written and
//! read in parallel, one blocking task per shard, and replaced atomically
//! (temp file + rename + fsync).

use std::collections::HashMap;
use std::fs;
use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use futures::future;

use super::ring::ConsistentHash;
use crate::error::IndexErr;
use crate::error::Result;

const SHARD_MAGIC: &[u8; 4] = b"TRSS";
const SHARD_VERSION: u32 = 1;

/// Recorded state of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    /// Modification time, unix seconds.
    pub mtime: i64,
    pub size: u64,
    /// Lowercase hex SHA-256 of the file bytes.
    pub hash: String,
}

/// The in-memory snapshot: relative path -> state.
pub type FileMap = HashMap<String, FileState>;

/// Sharded on-disk snapshot for one collection.
#[derive(Debug, Clone)]
pub struct ShardedSnapshot {
    base_dir: PathBuf,
    collection: String,
    ring: ConsistentHash,
}

impl ShardedSnapshot {
    pub fn new(base_dir: &Path, collection: &str, shard_count: usize, virtual_nodes: usize) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            collection: collection.to_string(),
            ring: ConsistentHash::with_virtual_nodes(shard_count, virtual_nodes),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.ring.shard_count()
    }

    /// Path of shard `n`: `<base>/<collection>.shard<N>.bin`.
    pub fn shard_path(&self, n: usize) -> PathBuf {
        self.base_dir.join(format!("{}.shard{n}.bin", self.collection))
    }

    /// Whether any shard file exists on disk.
    pub fn exists(&self) -> bool {
        (0..self.shard_count()).any(|n| self.shard_path(n).exists())
    }

    /// Partition `files` by the ring and write every shard in parallel.
    ///
    /// Shards with no assigned paths are still written (empty) so that a
    /// shrinking file set cannot leave stale records behind.
    pub async fn save(&self, files: &FileMap) -> Result<()> {
        fs::create_dir_all(&self.base_dir)?;

        let mut partitions: Vec<Vec<(String, FileState)>> =
            (0..self.shard_count()).map(|_| Vec::new()).collect();
        for (path, state) in files {
            partitions[self.ring.get_shard(path)].push((path.clone(), state.clone()));
        }

        let tasks: Vec<_> = partitions
            .into_iter()
            .enumerate()
            .map(|(n, mut entries)| {
                let path = self.shard_path(n);
                tokio::task::spawn_blocking(move || {
                    // Deterministic record order keeps shard bytes stable.
                    entries.sort_by(|a, b| a.0.cmp(&b.0));
                    write_shard(&path, &entries)
                })
            })
            .collect();

        for joined in future::join_all(tasks).await {
            joined.map_err(|e| IndexErr::SnapshotIo {
                path: self.base_dir.display().to_string(),
                cause: e.to_string(),
            })??;
        }
        Ok(())
    }

    /// Read every shard in parallel and merge.
    ///
    /// Returns `None` when no shard exists. A corrupt shard is an error;
    /// callers treat it as an absent snapshot and fall back to a full scan.
    pub async fn load(&self) -> Result<Option<FileMap>> {
        if !self.exists() {
            return Ok(None);
        }

        let tasks: Vec<_> = (0..self.shard_count())
            .map(|n| {
                let path = self.shard_path(n);
                tokio::task::spawn_blocking(move || read_shard(&path))
            })
            .collect();

        let mut merged = FileMap::new();
        for joined in future::join_all(tasks).await {
            let entries = joined.map_err(|e| IndexErr::SnapshotIo {
                path: self.base_dir.display().to_string(),
                cause: e.to_string(),
            })??;
            merged.extend(entries);
        }
        Ok(Some(merged))
    }

    /// Remove every shard file.
    pub async fn delete(&self) -> Result<()> {
        for n in 0..self.shard_count() {
            let path = self.shard_path(n);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

fn write_shard(path: &Path, entries: &[(String, FileState)]) -> Result<()> {
    let tmp = path.with_extension("bin.tmp");
    let mut file = File::create(&tmp)?;

    let mut buf = Vec::new();
    buf.extend_from_slice(SHARD_MAGIC);
    buf.extend_from_slice(&SHARD_VERSION.to_le_bytes());
    buf.extend_from_slice(&(entries.len() as u64).to_le_bytes());
    for (rel_path, state) in entries {
        let path_bytes = rel_path.as_bytes();
        let hash_bytes = state.hash.as_bytes();
        buf.extend_from_slice(&(path_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(path_bytes);
        buf.extend_from_slice(&state.mtime.to_le_bytes());
        buf.extend_from_slice(&state.size.to_le_bytes());
        buf.extend_from_slice(&(hash_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(hash_bytes);
    }

    file.write_all(&buf)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_shard(path: &Path) -> Result<FileMap> {
    let mut map = FileMap::new();
    if !path.exists() {
        return Ok(map);
    }

    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    let mut cursor = Cursor {
        bytes: &bytes,
        pos: 0,
        path,
    };

    let magic = cursor.take(4)?;
    if magic != SHARD_MAGIC {
        return Err(corrupt(path, "bad magic"));
    }
    let version = u32::from_le_bytes(cursor.take(4)?.try_into().map_err(|_| corrupt(path, "truncated version"))?);
    if version != SHARD_VERSION {
        return Err(corrupt(path, &format!("unsupported version {version}")));
    }
    let count = u64::from_le_bytes(cursor.take(8)?.try_into().map_err(|_| corrupt(path, "truncated count"))?);

    for _ in 0..count {
        let path_len = cursor.take_u32()? as usize;
        let rel_path = String::from_utf8(cursor.take(path_len)?.to_vec())
            .map_err(|_| corrupt(path, "non-utf8 path"))?;
        let mtime = i64::from_le_bytes(cursor.take(8)?.try_into().map_err(|_| corrupt(path, "truncated mtime"))?);
        let size = u64::from_le_bytes(cursor.take(8)?.try_into().map_err(|_| corrupt(path, "truncated size"))?);
        let hash_len = cursor.take_u32()? as usize;
        let hash = String::from_utf8(cursor.take(hash_len)?.to_vec())
            .map_err(|_| corrupt(path, "non-utf8 hash"))?;
        map.insert(rel_path, FileState { mtime, size, hash });
    }
    Ok(map)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(corrupt(self.path, "unexpected end of shard"));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(
            self.take(4)?
                .try_into()
                .map_err(|_| corrupt(self.path, "truncated length"))?,
        ))
    }
}

fn corrupt(path: &Path, cause: &str) -> IndexErr {
    IndexErr::SnapshotCorrupt {
        path: path.display().to_string(),
        cause: cause.to_string(),
    }
}
