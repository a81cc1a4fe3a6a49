//! Short-term cache of chain-of-trust results keyed by (owner, class).
//!
//! A `KeyEntry` is a closed sum: a validated key set, a proof that the zone
//! is unsigned, or a failed validation. The three must stay distinct; the
//! state machine branches on which one it finds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::dns::enums::RecordClass;
use crate::dns::name::Name;
use crate::smessage::SRRset;

/// How long a failed chain is remembered, to stop revalidation thrash
/// without pinning the failure for a full TTL.
pub const BAD_KEY_TTL_SECS: u32 = 60;

/// Result of priming a zone's keys.
#[derive(Clone, Debug)]
pub enum KeyEntry {
    /// A validated DNSKEY RRset usable to verify signatures below it.
    Good { keys: SRRset },
    /// Proof that the zone at `owner` is unsigned; the chain ends here and
    /// everything below is insecure.
    Null { owner: Name, rclass: RecordClass },
    /// Chain validation failed at `owner`.
    Bad {
        owner: Name,
        rclass: RecordClass,
        reason: String,
    },
}

impl KeyEntry {
    pub fn good(keys: SRRset) -> Self {
        KeyEntry::Good { keys }
    }

    pub fn null(owner: Name, rclass: RecordClass) -> Self {
        KeyEntry::Null { owner, rclass }
    }

    pub fn bad(owner: Name, rclass: RecordClass, reason: &str) -> Self {
        KeyEntry::Bad {
            owner,
            rclass,
            reason: reason.to_string(),
        }
    }

    pub fn owner(&self) -> &Name {
        match self {
            KeyEntry::Good { keys } => keys.name(),
            KeyEntry::Null { owner, .. } => owner,
            KeyEntry::Bad { owner, .. } => owner,
        }
    }

    pub fn rclass(&self) -> RecordClass {
        match self {
            KeyEntry::Good { keys } => keys.rclass(),
            KeyEntry::Null { rclass, .. } => *rclass,
            KeyEntry::Bad { rclass, .. } => *rclass,
        }
    }

    pub fn is_good(&self) -> bool {
        matches!(self, KeyEntry::Good { .. })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, KeyEntry::Null { .. })
    }

    pub fn is_bad(&self) -> bool {
        matches!(self, KeyEntry::Bad { .. })
    }

    pub fn keys(&self) -> Option<&SRRset> {
        match self {
            KeyEntry::Good { keys } => Some(keys),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            KeyEntry::Bad { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Cache lifetime: the key set's minimum TTL for good entries, the
    /// zone proof TTL for null entries, a short fixed TTL for bad ones.
    fn cache_ttl(&self, ttl_hint: u32) -> u32 {
        match self {
            KeyEntry::Good { keys } => keys.ttl(),
            KeyEntry::Null { .. } => ttl_hint,
            KeyEntry::Bad { .. } => BAD_KEY_TTL_SECS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    name: Name,
    rclass: RecordClass,
}

#[derive(Clone, Debug)]
struct CachedEntry {
    entry: KeyEntry,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct KeyCacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

/// LRU-bounded map of key entries. Readers race freely; expiry is checked
/// on read so a stale snapshot is harmless.
#[derive(Debug)]
pub struct KeyCache {
    entries: DashMap<CacheKey, CachedEntry>,
    insertion_order: Mutex<Vec<CacheKey>>,
    max_entries: usize,
    stats: KeyCacheStats,
}

pub const DEFAULT_KEYCACHE_ENTRIES: usize = 1000;

impl Default for KeyCache {
    fn default() -> Self {
        Self::new(DEFAULT_KEYCACHE_ENTRIES)
    }
}

impl KeyCache {
    pub fn new(max_entries: usize) -> Self {
        KeyCache {
            entries: DashMap::new(),
            insertion_order: Mutex::new(Vec::new()),
            max_entries: max_entries.max(1),
            stats: KeyCacheStats::default(),
        }
    }

    /// Store an entry. `ttl_hint` is the minimum TTL of the records that
    /// produced it (the proof records for null entries).
    pub fn store(&self, entry: KeyEntry, ttl_hint: u32) {
        let key = CacheKey {
            name: entry.owner().to_lowercase(),
            rclass: entry.rclass(),
        };
        let ttl = entry.cache_ttl(ttl_hint);
        trace!("key cache store {} for {}s", key.name, ttl);

        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict_oldest();
        }

        let cached = CachedEntry {
            entry,
            expires_at: Instant::now() + Duration::from_secs(ttl.into()),
        };
        if self.entries.insert(key.clone(), cached).is_none() {
            self.insertion_order.lock().push(key);
        }
    }

    /// Fetch a live entry; expired entries are dropped on read.
    pub fn get(&self, name: &Name, rclass: RecordClass) -> Option<KeyEntry> {
        let key = CacheKey {
            name: name.to_lowercase(),
            rclass,
        };

        if let Some(cached) = self.entries.get(&key) {
            if cached.expires_at > Instant::now() {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(cached.entry.clone());
            }
        }

        // Either absent or expired; forget the expired body.
        if self.entries.remove_if(&key, |_, c| c.expires_at <= Instant::now()).is_some() {
            debug!("key cache entry for {} expired", key.name);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &KeyCacheStats {
        &self.stats
    }

    fn evict_oldest(&self) {
        let victim = {
            let mut order = self.insertion_order.lock();
            if order.is_empty() {
                None
            } else {
                Some(order.remove(0))
            }
        };

        if let Some(key) = victim {
            self.entries.remove(&key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::enums::RecordType;
    use crate::dns::record::DnsRecord;

    fn dnskey_set(name: &str, ttl: u32) -> SRRset {
        SRRset::new(DnsRecord::new(
            Name::parse(name).unwrap(),
            RecordType::Dnskey,
            RecordClass::In,
            ttl,
            vec![1, 0, 3, 15, 0xAA],
        ))
    }

    #[test]
    fn store_and_get() {
        let cache = KeyCache::new(10);
        cache.store(KeyEntry::good(dnskey_set("example.com", 300)), 0);

        let entry = cache
            .get(&Name::parse("EXAMPLE.com").unwrap(), RecordClass::In)
            .unwrap();
        assert!(entry.is_good());
        assert!(cache
            .get(&Name::parse("example.org").unwrap(), RecordClass::In)
            .is_none());
    }

    #[test]
    fn zero_ttl_is_immediately_stale() {
        let cache = KeyCache::new(10);
        cache.store(KeyEntry::good(dnskey_set("example.com", 0)), 0);
        assert!(cache
            .get(&Name::parse("example.com").unwrap(), RecordClass::In)
            .is_none());
    }

    #[test]
    fn lru_eviction() {
        let cache = KeyCache::new(2);
        cache.store(KeyEntry::good(dnskey_set("a.example", 300)), 0);
        cache.store(KeyEntry::good(dnskey_set("b.example", 300)), 0);
        cache.store(KeyEntry::good(dnskey_set("c.example", 300)), 0);

        assert_eq!(cache.len(), 2);
        assert!(cache
            .get(&Name::parse("a.example").unwrap(), RecordClass::In)
            .is_none());
        assert!(cache
            .get(&Name::parse("c.example").unwrap(), RecordClass::In)
            .is_some());
    }

    #[test]
    fn entry_variants_stay_distinct() {
        let owner = Name::parse("unsigned.example").unwrap();
        let null = KeyEntry::null(owner.clone(), RecordClass::In);
        let bad = KeyEntry::bad(owner, RecordClass::In, "chain broken");
        assert!(null.is_null() && !null.is_bad() && !null.is_good());
        assert!(bad.is_bad() && bad.reason() == Some("chain broken"));
        assert!(null.keys().is_none());
    }
}
