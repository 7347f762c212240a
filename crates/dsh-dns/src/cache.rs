//! Response cache: canonical question key → stored response template.
//! Fixed capacity with oldest-inserted-first eviction; a single
//! configured TTL applies to every entry (per-record TTLs are ignored).

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tokio::sync::RwLock;

use crate::packet::{HEADER_LEN, QuestionKey};

struct CacheEntry {
    /// Wire bytes of the upstream reply with the transaction ID zeroed.
    /// Callers patch in the requesting client's ID before sending.
    template: Vec<u8>,
    expires_at: Instant,
    /// Insertion sequence number; replacing a key re-sequences it.
    seq: u64,
}

struct CacheInner {
    entries: FxHashMap<QuestionKey, CacheEntry>,
    next_seq: u64,
}

pub struct ResponseCache {
    inner: RwLock<CacheInner>,
    max_size: usize,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                entries: FxHashMap::with_capacity_and_hasher(max_size, Default::default()),
                next_seq: 0,
            }),
            max_size,
            ttl,
        }
    }

    /// Stored response template, TXID zeroed. Expired entries are removed
    /// under the same critical section as the lookup.
    pub async fn get(&self, key: &QuestionKey) -> Option<Vec<u8>> {
        let mut inner = self.inner.write().await;
        match inner.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.template.clone()),
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Record a response. At capacity the oldest-inserted entry is
    /// evicted; replacing an existing key refreshes both its expiry and
    /// its position in the eviction order.
    pub async fn set(&self, key: QuestionKey, response: &[u8]) {
        if response.len() < HEADER_LEN {
            return;
        }
        let mut template = response.to_vec();
        template[0] = 0;
        template[1] = 0;

        let mut inner = self.inner.write().await;
        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_size {
            if let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, v)| v.seq)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&oldest);
            }
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key,
            CacheEntry {
                template,
                expires_at: Instant::now() + self.ttl,
                seq,
            },
        );
    }

    /// Drop expired entries (called periodically so an idle cache does
    /// not pin stale responses in memory).
    pub async fn purge_expired(&self) -> usize {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, v| v.expires_at > now);
        before - inner.entries.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }
}
