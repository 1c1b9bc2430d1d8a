//! # Key Index
//!
//! In-memory hash table mapping key strings to page identifiers. This is the
//! lookup structure in front of the page mapper: a client resolves a key here
//! to obtain the page identifier it then feeds to the FTL.
//!
//! ## Chain Semantics
//!
//! `put` appends to the bucket chain unconditionally. It never searches for
//! or evicts a previous entry with the same key; superseded entries stay in
//! the chain until [`KeyIndex::clear`], which is the only deletion path.
//! `get` scans the chain newest-first and returns the first exact match, so
//! the most recent `put` for a key always wins.
//!
//! Retaining superseded entries is the documented contract, not an accident:
//! the memory they occupy is only reclaimed by `clear()`. Hosts that churn
//! keys must clear and rebuild the index periodically (a mount does this for
//! free, see `store::FlashStore::mount`).
//!
//! ## Hashing
//!
//! FNV-1a over the key bytes, folded modulo the configured bucket count. The
//! bucket count is fixed at construction.

use smallvec::SmallVec;

use crate::ftl::PAGE_NONE;

const FNV_32_PRIME: u32 = 16_777_619;
const FNV_32_BASIS: u32 = 2_166_136_261;

#[derive(Debug)]
struct IndexEntry {
    key: Box<str>,
    page_no: u64,
}

#[derive(Debug)]
pub struct KeyIndex {
    buckets: Vec<SmallVec<[IndexEntry; 4]>>,
}

impl KeyIndex {
    /// Creates an index with `buckets` hash buckets (fixed thereafter).
    pub fn new(buckets: usize) -> Self {
        assert!(buckets > 0, "index needs at least one bucket");
        Self {
            buckets: (0..buckets).map(|_| SmallVec::new()).collect(),
        }
    }

    fn bucket_of(&self, key: &str) -> usize {
        (fnv1a(key.as_bytes()) as usize) % self.buckets.len()
    }

    /// Inserts `(key, page_no)` as the newest entry of its bucket chain. Any
    /// earlier entry for the same key is superseded but not removed.
    pub fn put(&mut self, key: &str, page_no: u64) {
        let bucket = self.bucket_of(key);
        self.buckets[bucket].push(IndexEntry {
            key: key.into(),
            page_no,
        });
    }

    /// Returns the page identifier of the most recent `put` for `key`, or
    /// [`PAGE_NONE`] if the key has never been inserted.
    pub fn get(&self, key: &str) -> u64 {
        let bucket = self.bucket_of(key);
        // Newest entries sit at the back; scan newest-first.
        for entry in self.buckets[bucket].iter().rev() {
            if &*entry.key == key {
                return entry.page_no;
            }
        }
        PAGE_NONE
    }

    /// Drops every entry across all buckets. The only deletion path.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }

    /// Total number of live entries, superseded ones included.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash = FNV_32_BASIS;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(FNV_32_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_last_put_for_each_key() {
        let mut index = KeyIndex::new(64);
        index.put("alpha", 10);
        index.put("beta", 20);

        assert_eq!(index.get("alpha"), 10);
        assert_eq!(index.get("beta"), 20);
    }

    #[test]
    fn repeated_put_wins_without_removing_old_entries() {
        let mut index = KeyIndex::new(64);
        index.put("k", 1);
        index.put("k", 2);
        index.put("k", 3);

        assert_eq!(index.get("k"), 3);
        // Superseded entries are retained until clear().
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn missing_key_returns_sentinel() {
        let index = KeyIndex::new(64);

        assert_eq!(index.get("ghost"), PAGE_NONE);
    }

    #[test]
    fn clear_forgets_every_key() {
        let mut index = KeyIndex::new(8);
        for i in 0..32 {
            index.put(&format!("key-{i}"), i);
        }

        index.clear();

        assert!(index.is_empty());
        for i in 0..32 {
            assert_eq!(index.get(&format!("key-{i}")), PAGE_NONE);
        }
    }

    #[test]
    fn colliding_keys_coexist_in_one_bucket() {
        // One bucket forces every key into the same chain.
        let mut index = KeyIndex::new(1);
        index.put("a", 1);
        index.put("b", 2);
        index.put("c", 3);

        assert_eq!(index.get("a"), 1);
        assert_eq!(index.get("b"), 2);
        assert_eq!(index.get("c"), 3);
    }

    #[test]
    fn sentinel_value_can_be_stored_as_tombstone() {
        let mut index = KeyIndex::new(4);
        index.put("k", 7);
        index.put("k", PAGE_NONE);

        assert_eq!(index.get("k"), PAGE_NONE);
    }
}
