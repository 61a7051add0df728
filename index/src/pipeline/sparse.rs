//! Deterministic sparse vector generation for hybrid search.
//!
//! Splits code into identifier-ish terms (camelCase and snake_case aware),
//! hashes each term into a stable 31-bit index, and weights by dampened
//! term frequency. No model and no corpus statistics: the same text always
//! produces the same vector, on any machine.

use std::collections::HashMap;

use sha2::Digest;
use sha2::Sha256;

use crate::types::SparseVector;

/// Sparse dimension space (2^31, safely inside u32).
const INDEX_SPACE: u64 = 1 << 31;

/// Minimum term length kept after splitting.
const MIN_TERM_LEN: usize = 2;

/// Build the sparse vector for one chunk of code.
pub fn sparse_vector(text: &str) -> SparseVector {
    let mut frequencies: HashMap<u32, f32> = HashMap::new();
    for term in tokenize(text) {
        *frequencies.entry(term_index(&term)).or_default() += 1.0;
    }

    let mut entries: Vec<(u32, f32)> = frequencies
        .into_iter()
        .map(|(index, tf)| (index, 1.0 + tf.ln()))
        .collect();
    entries.sort_unstable_by_key(|(index, _)| *index);

    SparseVector {
        indices: entries.iter().map(|(index, _)| *index).collect(),
        values: entries.iter().map(|(_, value)| *value).collect(),
    }
}

/// Lowercased terms: split on non-alphanumerics, then on case boundaries.
fn tokenize(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
        for word in raw.split('_') {
            if word.is_empty() {
                continue;
            }
            for part in split_camel(word) {
                if part.len() >= MIN_TERM_LEN {
                    terms.push(part.to_lowercase());
                }
            }
            // Keep the compound form too so exact identifier matches score.
            if word.len() >= MIN_TERM_LEN && word.chars().any(|c| c.is_uppercase()) {
                terms.push(word.to_lowercase());
            }
        }
    }
    terms
}

fn split_camel(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in word.chars() {
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_numeric();
        current.push(c);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn term_index(term: &str) -> u32 {
    let digest = Sha256::digest(term.as_bytes());
    let raw = u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ]);
    (raw % INDEX_SPACE) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_same_vector() {
        let a = sparse_vector("fn getUserById(id: u64) -> User");
        let b = sparse_vector("fn getUserById(id: u64) -> User");
        assert_eq!(a, b);
        assert!(!a.indices.is_empty());
    }

    #[test]
    fn indices_are_sorted_and_unique() {
        let v = sparse_vector("let user = user_service.find(user_id);");
        let mut sorted = v.indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(v.indices, sorted);
        assert_eq!(v.indices.len(), v.values.len());
    }

    #[test]
    fn camel_and_snake_share_terms() {
        let camel = sparse_vector("getUserById");
        let snake = sparse_vector("get_user_by_id");
        let shared: Vec<u32> = camel
            .indices
            .iter()
            .filter(|i| snake.indices.contains(i))
            .copied()
            .collect();
        // "get", "user", "by"? "by" is below MIN_TERM_LEN; "id" qualifies.
        assert!(shared.len() >= 3);
    }

    #[test]
    fn repeated_terms_weigh_more_but_dampened() {
        let once = sparse_vector("retry");
        let thrice = sparse_vector("retry retry retry");
        assert_eq!(once.indices, thrice.indices);
        assert!(thrice.values[0] > once.values[0]);
        assert!(thrice.values[0] < 3.0 * once.values[0]);
    }

    #[test]
    fn empty_text_is_an_empty_vector() {
        let v = sparse_vector("   \n\t  ");
        assert!(v.indices.is_empty());
        assert!(v.values.is_empty());
    }
}
