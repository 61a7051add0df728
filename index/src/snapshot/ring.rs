//! Consistent-hash ring for snapshot sharding.
//!
//! Each shard owns `virtual_nodes` tokens on a 64-bit ring; a key maps to
//! the shard owning the next token at or after the key's hash, wrapping
//! around. Growing from N to M shards therefore relocates roughly
//! `1 - min(N,M)/max(N,M)` of the keys instead of nearly all of them.

use sha2::Digest;
use sha2::Sha256;

/// Default virtual nodes per shard.
pub const DEFAULT_VIRTUAL_NODES: usize = 150;

/// Immutable consistent-hash ring.
#[derive(Debug, Clone)]
pub struct ConsistentHash {
    /// (token, shard) pairs sorted by token.
    ring: Vec<(u64, usize)>,
    shard_count: usize,
}

impl ConsistentHash {
    /// Build a ring with the default virtual-node count.
    pub fn new(shard_count: usize) -> Self {
        Self::with_virtual_nodes(shard_count, DEFAULT_VIRTUAL_NODES)
    }

    /// Build a ring with `shard_count * virtual_nodes` tokens.
    pub fn with_virtual_nodes(shard_count: usize, virtual_nodes: usize) -> Self {
        let shard_count = shard_count.max(1);
        let virtual_nodes = virtual_nodes.max(1);

        let mut ring = Vec::with_capacity(shard_count * virtual_nodes);
        for shard in 0..shard_count {
            for vnode in 0..virtual_nodes {
                ring.push((stable_hash(&format!("shard-{shard}-vnode-{vnode}")), shard));
            }
        }
        ring.sort_unstable();

        Self { ring, shard_count }
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Map a key to its shard.
    pub fn get_shard(&self, key: &str) -> usize {
        let hash = stable_hash(key);
        let index = match self.ring.binary_search_by_key(&hash, |(token, _)| *token) {
            Ok(i) => i,
            Err(i) => i,
        };
        // Wrap to the first token when the hash lands past the last one.
        let (_, shard) = self.ring[index % self.ring.len()];
        shard
    }
}

/// Process-stable 64-bit hash.
///
/// `std` hashers are randomly seeded per process; shard assignment has to
/// survive restarts, so the token space is derived from SHA-256 instead.
fn stable_hash(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    /// Deterministic pseudo-random key set for distribution checks.
    fn sample_keys(count: usize) -> Vec<String> {
        (0..count)
            .map(|i| format!("src/module_{}/file_{}.rs", i % 37, i * 7919))
            .collect()
    }

    #[test]
    fn assignment_is_deterministic() {
        let a = ConsistentHash::new(8);
        let b = ConsistentHash::new(8);
        for key in sample_keys(100) {
            assert_eq!(a.get_shard(&key), b.get_shard(&key));
        }
    }

    #[test]
    fn distribution_is_within_tolerance() {
        let ring = ConsistentHash::new(4);
        let keys = sample_keys(1000);

        let mut counts: HashMap<usize, usize> = HashMap::new();
        for key in &keys {
            *counts.entry(ring.get_shard(key)).or_default() += 1;
        }

        let ideal = keys.len() as f64 / 4.0;
        for shard in 0..4 {
            let count = *counts.get(&shard).unwrap_or(&0) as f64;
            let deviation = (count - ideal).abs() / ideal;
            assert!(
                deviation <= 0.35,
                "shard {shard} holds {count} keys, deviation {deviation:.2}"
            );
        }
    }

    #[test]
    fn doubling_shards_moves_a_bounded_fraction() {
        let before = ConsistentHash::new(4);
        let after = ConsistentHash::new(8);
        let keys = sample_keys(1000);

        let moved = keys
            .iter()
            .filter(|k| before.get_shard(k) != after.get_shard(k))
            .count();

        // Expected ~ 1 - 4/8 = 0.5; allow empirical slack.
        let fraction = moved as f64 / keys.len() as f64;
        assert!(fraction <= 0.6, "moved fraction {fraction:.2}");
        assert!(fraction > 0.0);
    }

    #[test]
    fn pathological_keys_resolve() {
        let ring = ConsistentHash::new(8);
        let long = "a/".repeat(4096);
        for key in ["", "ユーザー/サービス.ts", "path with spaces/f.ts", &long] {
            assert!(ring.get_shard(key) < 8);
        }
    }

    #[test]
    fn single_shard_takes_everything() {
        let ring = ConsistentHash::new(1);
        for key in sample_keys(50) {
            assert_eq!(ring.get_shard(&key), 0);
        }
    }
}
