//! Text canonicalization and content hashing.
//!
//! Change detection works solely off persisted hashes: a stage re-derives
//! the hash of an entity's current text and compares it to the stored one,
//! so restarted or horizontally-scaled workers always agree on what changed.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::ChangeDecision;

/// Canonicalize free-form source text before hashing.
///
/// Unifies line endings, collapses horizontal whitespace runs, drops blank
/// lines, and trims. Hashes are only comparable across runs because every
/// caller normalizes the same way.
pub fn normalize_text(s: &str) -> String {
    let unified = s.replace("\r\n", "\n").replace('\r', "\n");
    unified
        .split('\n')
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate to at most `max_bytes` without splitting a UTF-8 sequence.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// A SHA-256 content hash in lowercase hex.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash the given text. Callers normalize first.
    pub fn compute(text: &str) -> Self {
        let digest = Sha256::digest(text.as_bytes());
        Self(hex::encode(digest))
    }

    /// Wrap a hash string read back from storage.
    pub fn from_stored(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classify an entity against its last stored hash.
pub fn detect_change(stored: Option<&ContentHash>, current: &ContentHash) -> ChangeDecision {
    match stored {
        None => ChangeDecision::New,
        Some(prior) if prior == current => ChangeDecision::Unchanged,
        Some(_) => ChangeDecision::Changed,
    }
}

/// Content-addressed document id: SHA-256 of `<natural_key>::<lang>`.
///
/// The natural key already carries the entity-kind prefix, so the id input
/// covers (entity kind, natural key, language). Byte-identical across runs
/// and processes for the same inputs.
pub fn document_id(natural_key: &str, lang: &str) -> String {
    let digest = Sha256::digest(format!("{}::{}", natural_key, lang).as_bytes());
    hex::encode(digest)
}
