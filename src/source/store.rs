//! In-memory document store
//!
//! Holds PDF byte streams under opaque keys: uploaded sources when the
//! client asks for caching, and every edited output so results can be
//! downloaded or fed back into another operation by key. LRU with both an
//! entry cap and a byte budget; nothing survives process exit.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

struct StoreInner {
    lru: LruCache<String, Vec<u8>>,
    total_bytes: usize,
}

/// Byte-budgeted LRU store for PDF data.
pub struct DocumentStore {
    inner: Mutex<StoreInner>,
    max_bytes: usize,
}

impl DocumentStore {
    pub fn new(capacity: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: Mutex::new(StoreInner {
                lru: LruCache::new(capacity),
                total_bytes: 0,
            }),
            max_bytes,
        }
    }

    /// Store a document under a fresh unique key and return the key.
    /// Documents larger than the whole byte budget are not retained and
    /// yield no key.
    pub fn insert(&self, data: Vec<u8>) -> Option<String> {
        let size = data.len();
        if size > self.max_bytes {
            tracing::warn!(size, max = self.max_bytes, "document exceeds store budget");
            return None;
        }

        let mut inner = self.inner.lock();

        let key = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !inner.lru.contains(&candidate) {
                break candidate;
            }
        };

        // Evict LRU entries until the byte budget is satisfied
        while inner.total_bytes + size > self.max_bytes {
            if let Some((_, evicted)) = inner.lru.pop_lru() {
                inner.total_bytes = inner.total_bytes.saturating_sub(evicted.len());
            } else {
                break;
            }
        }

        inner.total_bytes += size;
        inner.lru.put(key.clone(), data);
        Some(key)
    }

    /// Fetch a document by key.
    pub fn fetch(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().lru.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().lru.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().lru.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }
}
