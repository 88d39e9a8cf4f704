//! xxh3-based string interner.
//!
//! Query text, relation names and session metadata repeat heavily between
//! passes; records store the 64-bit hash and the interner keeps one copy of
//! the text for resolution at read time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use xxhash_rust::xxh3::xxh3_64;

#[derive(Default, Serialize, Deserialize, Clone)]
pub struct StringInterner {
    strings: HashMap<u64, String>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string and returns its hash (ID).
    pub fn intern(&mut self, s: &str) -> u64 {
        let hash = xxh3_64(s.as_bytes());
        self.strings.entry(hash).or_insert_with(|| s.to_string());
        hash
    }

    /// Resolves a hash back to a string.
    pub fn resolve(&self, hash: u64) -> Option<&str> {
        self.strings.get(&hash).map(|s| s.as_str())
    }

    pub fn clear(&mut self) {
        self.strings.clear();
        self.strings.shrink_to_fit();
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable_and_deduplicated() {
        let mut interner = StringInterner::new();
        let h1 = interner.intern("SELECT * FROM accounts WHERE id = $1");
        let h2 = interner.intern("SELECT * FROM accounts WHERE id = $1");

        assert_eq!(h1, h2);
        assert_eq!(interner.len(), 1);
        assert_eq!(
            interner.resolve(h1),
            Some("SELECT * FROM accounts WHERE id = $1")
        );
        assert_eq!(interner.resolve(0xDEAD_BEEF), None);
    }
}
