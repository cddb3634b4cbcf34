//! Bounded in-memory status cache.
//!
//! Keys are spread over independently locked LRU shards, so writers to distinct
//! keys rarely contend while every key is still serialized by exactly one lock.
//! Each entry remembers when it was inserted; entries older than the configured
//! maximum age read as absent.

use crate::config::CacheConfig;
use crate::error::StatusError;
use crate::journal::FileJournal;
use crate::status::{StatusKey, StatusValue};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct CacheEntry {
    value: StatusValue,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, max_age: Option<Duration>) -> bool {
        max_age.is_some_and(|age| self.inserted_at.elapsed() > age)
    }
}

/// Counters describing cache behaviour.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing (or an expired entry).
    pub misses: u64,
    /// Entries pushed out by capacity.
    pub evictions: u64,
    /// Entries dropped because they outlived `max_age`.
    pub expirations: u64,
    /// Current number of entries, expired ones included until touched.
    pub size: usize,
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Status cache keyed by (project, destination, ref).
pub struct StatusCache {
    shards: Vec<Mutex<LruCache<StatusKey, CacheEntry>>>,
    max_age: Option<Duration>,
    journal: Option<FileJournal>,
    stats: AtomicStats,
}

impl StatusCache {
    /// Create an empty cache.
    pub fn new(config: &CacheConfig) -> Self {
        let shard_count = config.shards.max(1);
        let per_shard = config.max_entries.div_ceil(shard_count).max(1);
        let capacity = NonZeroUsize::new(per_shard).unwrap_or(NonZeroUsize::MIN);

        let shards = (0..shard_count)
            .map(|_| Mutex::new(LruCache::new(capacity)))
            .collect();

        Self {
            shards,
            max_age: config.max_age(),
            journal: None,
            stats: AtomicStats::default(),
        }
    }

    /// Create a cache that appends every write to `journal`.
    pub fn with_journal(config: &CacheConfig, journal: FileJournal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::new(config)
        }
    }

    /// Create a journaled cache and load whatever the journal already holds.
    pub fn recover(config: &CacheConfig, journal: FileJournal) -> Result<Self, StatusError> {
        let entries = journal.replay()?;
        let cache = Self::with_journal(config, journal);
        let count = entries.len();
        for (key, value) in entries {
            cache.insert(key, value);
        }
        tracing::info!(records = count, "status cache recovered from journal");
        Ok(cache)
    }

    fn shard(&self, key: &StatusKey) -> &Mutex<LruCache<StatusKey, CacheEntry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    fn insert_locked(
        &self,
        shard: &mut LruCache<StatusKey, CacheEntry>,
        key: StatusKey,
        value: StatusValue,
    ) {
        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
        };
        if let Some((evicted, _)) = shard.push(key.clone(), entry) {
            if evicted != key {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn insert(&self, key: StatusKey, value: StatusValue) {
        let mut shard = self.shard(&key).lock();
        self.insert_locked(&mut shard, key, value);
    }

    /// Store `value` under `key`, replacing whatever was there.
    ///
    /// No ordering check is made against the previous value's timestamp.
    /// The journal append happens under the key's shard lock, so journal
    /// order matches cache order for each key.
    pub fn put(&self, key: StatusKey, value: StatusValue) {
        let mut shard = self.shard(&key).lock();
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&key, &value) {
                tracing::warn!(error = %e, project = key.project(), "failed to journal status write");
            }
        }
        self.insert_locked(&mut shard, key, value);
    }

    /// Return the live value for `key`, if any.
    pub fn get_if_present(&self, key: &StatusKey) -> Option<StatusValue> {
        let mut shard = self.shard(key).lock();
        let expired = match shard.get(key) {
            Some(entry) if !entry.is_expired(self.max_age) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            shard.pop(key);
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Drop a single key.
    pub fn invalidate(&self, key: &StatusKey) {
        self.shard(key).lock().pop(key);
    }

    /// Drop everything.
    pub fn invalidate_all(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    /// Number of stored entries, expired ones included until touched.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// True if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy out every live entry. Shards are visited one at a time, so the
    /// result is not a point-in-time snapshot.
    pub fn entries(&self) -> Vec<(StatusKey, StatusValue)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock();
            out.extend(
                shard
                    .iter()
                    .filter(|(_, entry)| !entry.is_expired(self.max_age))
                    .map(|(key, entry)| (key.clone(), entry.value)),
            );
        }
        out
    }

    /// Rewrite the journal so it holds only the live entries.
    ///
    /// Every shard stays locked until the new journal is in place, so no
    /// write can land in the file being replaced.
    pub fn compact_journal(&self) -> Result<(), StatusError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let shards: Vec<_> = self.shards.iter().map(|s| s.lock()).collect();
        let live: Vec<(StatusKey, StatusValue)> = shards
            .iter()
            .flat_map(|shard| shard.iter())
            .filter(|(_, entry)| !entry.is_expired(self.max_age))
            .map(|(key, entry)| (key.clone(), entry.value))
            .collect();
        journal.compact(&live)
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expirations: self.stats.expirations.load(Ordering::Relaxed),
            size: self.len(),
        }
    }
}

impl std::fmt::Debug for StatusCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusCache")
            .field("shards", &self.shards.len())
            .field("max_age", &self.max_age)
            .field("journaled", &self.journal.is_some())
            .finish()
    }
}
