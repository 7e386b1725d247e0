//! Memory-aware cache with LRU and byte-budget eviction
//!
//! Bounded key→value store shared by the orchestrator for profile reuse.
//! Two ceilings are enforced on every insert: an entry-count ceiling and an
//! estimated-byte ceiling. Eviction is least-recently-used by last-access
//! stamp, with insertion order breaking ties. The access-order index is a
//! `BTreeMap` keyed by a monotonic stamp, so every touch and eviction is
//! O(log n).
//!
//! Statistics are exposed for observability only; eviction decisions never
//! read them.

use num_bigint::BigUint;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::types::{AddressProfile, CounterpartyStats, ProfileAnalysis};

/// Fixed cost charged for any numeric or boolean leaf value
const SCALAR_COST: usize = 8;

/// Fixed overhead charged per composite value
const OBJECT_OVERHEAD: usize = 32;

/// Recursive size estimate used for the cache byte budget
///
/// Numbers and booleans are fixed-cost, strings cost two bytes per
/// character, composite values sum their members plus a fixed per-object
/// overhead. This is an accounting estimate, not an allocator measurement.
pub trait EstimateSize {
    fn estimated_bytes(&self) -> usize;
}

impl EstimateSize for bool {
    fn estimated_bytes(&self) -> usize {
        SCALAR_COST
    }
}

impl EstimateSize for u32 {
    fn estimated_bytes(&self) -> usize {
        SCALAR_COST
    }
}

impl EstimateSize for u64 {
    fn estimated_bytes(&self) -> usize {
        SCALAR_COST
    }
}

impl EstimateSize for i64 {
    fn estimated_bytes(&self) -> usize {
        SCALAR_COST
    }
}

impl EstimateSize for f64 {
    fn estimated_bytes(&self) -> usize {
        SCALAR_COST
    }
}

impl EstimateSize for String {
    fn estimated_bytes(&self) -> usize {
        self.chars().count() * 2
    }
}

impl EstimateSize for BigUint {
    fn estimated_bytes(&self) -> usize {
        (self.bits() as usize / 8) + SCALAR_COST
    }
}

impl<T: EstimateSize> EstimateSize for Vec<T> {
    fn estimated_bytes(&self) -> usize {
        OBJECT_OVERHEAD + self.iter().map(|v| v.estimated_bytes()).sum::<usize>()
    }
}

impl<T: EstimateSize> EstimateSize for Arc<T> {
    fn estimated_bytes(&self) -> usize {
        self.as_ref().estimated_bytes()
    }
}

impl EstimateSize for CounterpartyStats {
    fn estimated_bytes(&self) -> usize {
        OBJECT_OVERHEAD
            + self.address.estimated_bytes()
            + self.transaction_count.estimated_bytes()
            + self.volume_sent.estimated_bytes()
            + self.volume_received.estimated_bytes()
    }
}

impl EstimateSize for ProfileAnalysis {
    fn estimated_bytes(&self) -> usize {
        OBJECT_OVERHEAD + 3 * SCALAR_COST
    }
}

impl EstimateSize for AddressProfile {
    fn estimated_bytes(&self) -> usize {
        let daily: usize = self
            .daily_activity
            .keys()
            .map(|k| k.estimated_bytes() + SCALAR_COST)
            .sum();

        OBJECT_OVERHEAD
            + self.address.estimated_bytes()
            + self.transaction_count.estimated_bytes()
            + self.total_volume_sent.estimated_bytes()
            + self.total_volume_received.estimated_bytes()
            + self.avg_transaction_size.estimated_bytes()
            + self.counterparties.estimated_bytes()
            + 24 * SCALAR_COST
            + daily
            + self.analysis.estimated_bytes()
    }
}

/// Outcome of a `set`, so callers can log the oversized degradation case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Inserted within both budgets
    Inserted,

    /// Value alone exceeds the byte budget even after full eviction; it was
    /// inserted anyway (accepted degradation, caller should log it)
    InsertedOversized,
}

/// Cache hit/miss/eviction counters
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub sets: u64,
}

impl CacheStats {
    /// Hits over total lookups, 0.0 when nothing was looked up yet
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry<V> {
    value: V,
    written_at: Instant,
    expires_at: Option<Instant>,
    size_bytes: usize,

    /// Current position in the access-order index
    access_key: (u64, u64),
}

/// Bounded key→value store with LRU + memory-budget eviction
///
/// Clocks are injectable (teacher-style `now_fn`) so TTL behavior is
/// deterministic under test.
pub struct MemoryCache<V: EstimateSize + Clone> {
    entries: HashMap<String, CacheEntry<V>>,
    access_index: BTreeMap<(u64, u64), String>,

    /// Monotonic access stamp; bumped on every get/set
    stamp: u64,

    /// Monotonic insertion sequence; tie-breaker for identical stamps
    seq: u64,

    max_entries: usize,
    max_bytes: usize,
    current_bytes: usize,

    stats: CacheStats,
    now_fn: Box<dyn Fn() -> Instant + Send>,
}

impl<V: EstimateSize + Clone> MemoryCache<V> {
    /// Create a cache with the given entry-count and byte ceilings
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self::new_with_clock(max_entries, max_bytes, Box::new(Instant::now))
    }

    /// Create a cache with an injected clock (for deterministic TTL tests)
    pub fn new_with_clock(
        max_entries: usize,
        max_bytes: usize,
        now_fn: Box<dyn Fn() -> Instant + Send>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            access_index: BTreeMap::new(),
            stamp: 0,
            seq: 0,
            max_entries,
            max_bytes,
            current_bytes: 0,
            stats: CacheStats::default(),
            now_fn,
        }
    }

    /// Look up a key, refreshing its LRU position on hit
    ///
    /// An entry past its TTL behaves as absent and is deleted lazily.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = (self.now_fn)();

        let expired = match self.entries.get(key) {
            Some(entry) => entry.expires_at.is_some_and(|at| now >= at),
            None => {
                self.stats.misses += 1;
                return None;
            }
        };

        if expired {
            self.remove_entry(key);
            self.stats.misses += 1;
            return None;
        }

        self.stats.hits += 1;
        self.touch(key);
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// Insert a value, evicting LRU entries first until both budgets hold
    pub fn set(&mut self, key: &str, value: V, ttl: Option<Duration>) -> SetOutcome {
        let now = (self.now_fn)();
        let size = value.estimated_bytes();

        // Replace semantics: drop any existing entry before accounting
        self.remove_entry(key);
        self.stats.sets += 1;

        // Evict oldest-access entries until the insert fits both ceilings
        while !self.entries.is_empty()
            && (self.entries.len() + 1 > self.max_entries
                || self.current_bytes + size > self.max_bytes)
        {
            self.evict_lru();
        }

        let outcome = if size > self.max_bytes {
            // Single oversized value: inserted anyway, caller logs it
            SetOutcome::InsertedOversized
        } else {
            SetOutcome::Inserted
        };

        self.stamp += 1;
        self.seq += 1;
        let access_key = (self.stamp, self.seq);
        self.access_index.insert(access_key, key.to_string());
        self.current_bytes += size;
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                written_at: now,
                expires_at: ttl.map(|t| now + t),
                size_bytes: size,
                access_key,
            },
        );

        outcome
    }

    /// Remove a key; returns whether it was present
    pub fn delete(&mut self, key: &str) -> bool {
        self.remove_entry(key)
    }

    /// Whether a live (non-expired) entry exists; does not refresh LRU
    pub fn has(&mut self, key: &str) -> bool {
        let now = (self.now_fn)();
        match self.entries.get(key) {
            Some(entry) if entry.expires_at.is_some_and(|at| now >= at) => {
                self.remove_entry(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Drop everything; budgets and stats are kept
    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_index.clear();
        self.current_bytes = 0;
    }

    /// Batch lookup, position-aligned with the input keys
    pub fn get_many(&mut self, keys: &[String]) -> Vec<Option<V>> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    /// Batch insert with a shared TTL
    pub fn set_many(&mut self, pairs: Vec<(String, V)>, ttl: Option<Duration>) {
        for (key, value) in pairs {
            self.set(&key, value, ttl);
        }
    }

    /// Freshness probe for scan dispatch: true when a live entry younger
    /// than `window` exists. Counts a hit (and refreshes LRU) or a miss,
    /// since a fresh entry is being served in place of a re-fetch.
    pub fn is_fresh(&mut self, key: &str, window: Duration) -> bool {
        match self.peek_age(key) {
            Some(age) if age < window => {
                self.stats.hits += 1;
                self.touch(key);
                true
            }
            _ => {
                self.stats.misses += 1;
                false
            }
        }
    }

    /// Age of a live entry since it was written; `None` if absent/expired.
    /// Does not refresh the LRU position (freshness probes must not pin
    /// entries in the cache).
    pub fn peek_age(&self, key: &str) -> Option<Duration> {
        let now = (self.now_fn)();
        let entry = self.entries.get(key)?;
        if entry.expires_at.is_some_and(|at| now >= at) {
            return None;
        }
        Some(now.duration_since(entry.written_at))
    }

    /// Clone of every live value, without touching LRU order
    pub fn snapshot_values(&self) -> Vec<V> {
        let now = (self.now_fn)();
        self.entries
            .values()
            .filter(|e| !e.expires_at.is_some_and(|at| now >= at))
            .map(|e| e.value.clone())
            .collect()
    }

    /// Evict up to `count` LRU entries (memory-pressure shedding)
    pub fn shed(&mut self, count: usize) -> usize {
        let mut dropped = 0;
        for _ in 0..count {
            if !self.evict_lru() {
                break;
            }
            dropped += 1;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current estimated byte footprint of all entries
    pub fn estimated_bytes(&self) -> usize {
        self.current_bytes
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Move a key to the most-recent end of the access index
    fn touch(&mut self, key: &str) {
        self.stamp += 1;
        let stamp = self.stamp;
        if let Some(entry) = self.entries.get_mut(key) {
            self.access_index.remove(&entry.access_key);
            entry.access_key = (stamp, entry.access_key.1);
            self.access_index.insert(entry.access_key, key.to_string());
        }
    }

    /// Remove the least-recently-used entry; returns false when empty
    fn evict_lru(&mut self) -> bool {
        let victim = match self.access_index.iter().next() {
            Some((_, key)) => key.clone(),
            None => return false,
        };
        if self.remove_entry(&victim) {
            self.stats.evictions += 1;
            true
        } else {
            false
        }
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.access_index.remove(&entry.access_key);
                self.current_bytes -= entry.size_bytes;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Cache over plain strings with a controllable clock offset
    fn clocked_cache(
        max_entries: usize,
        max_bytes: usize,
    ) -> (MemoryCache<String>, Arc<AtomicU64>) {
        let offset_ms = Arc::new(AtomicU64::new(0));
        let probe = offset_ms.clone();
        let base = Instant::now();
        let cache = MemoryCache::new_with_clock(
            max_entries,
            max_bytes,
            Box::new(move || base + Duration::from_millis(probe.load(Ordering::SeqCst))),
        );
        (cache, offset_ms)
    }

    #[test]
    fn test_entry_count_ceiling_holds() {
        // Test: after every set, entry count stays within the ceiling
        let mut cache: MemoryCache<String> = MemoryCache::new(3, 1_000_000);

        for i in 0..10 {
            cache.set(&format!("key_{}", i), format!("value_{}", i), None);
            assert!(cache.len() <= 3);
        }
    }

    #[test]
    fn test_byte_budget_holds() {
        // Test: estimated bytes stay within the budget for normal values
        // ("abcde" costs 10 bytes; the 40-byte budget fits four entries)
        let mut cache: MemoryCache<String> = MemoryCache::new(1_000, 40);

        for i in 0..20 {
            cache.set(&format!("k{}", i), "abcde".to_string(), None);
            assert!(cache.estimated_bytes() <= 40);
        }
    }

    #[test]
    fn test_oversized_value_is_accepted_and_reported() {
        // Edge case: a single value already above the byte budget is still
        // inserted, and the outcome labels it as the anomaly
        let mut cache: MemoryCache<String> = MemoryCache::new(10, 16);

        let outcome = cache.set("big", "x".repeat(100), None);

        assert_eq!(outcome, SetOutcome::InsertedOversized);
        assert_eq!(cache.len(), 1);
        assert!(cache.estimated_bytes() > 16);
    }

    #[test]
    fn test_lru_evicts_first_inserted_without_gets() {
        // Test: capacity N, N+1 distinct inserts, no intervening gets
        // -> the first-inserted key is the one evicted
        let mut cache: MemoryCache<String> = MemoryCache::new(3, 1_000_000);

        cache.set("first", "a".to_string(), None);
        cache.set("second", "b".to_string(), None);
        cache.set("third", "c".to_string(), None);
        cache.set("fourth", "d".to_string(), None);

        assert!(!cache.has("first"));
        assert!(cache.has("second"));
        assert!(cache.has("third"));
        assert!(cache.has("fourth"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_refreshes_lru_position() {
        // Test: touching the oldest key protects it from the next eviction
        let mut cache: MemoryCache<String> = MemoryCache::new(2, 1_000_000);

        cache.set("old", "a".to_string(), None);
        cache.set("young", "b".to_string(), None);
        assert!(cache.get("old").is_some()); // old is now most recent

        cache.set("newest", "c".to_string(), None);

        assert!(cache.has("old"));
        assert!(!cache.has("young"));
    }

    #[test]
    fn test_ttl_expiry_behaves_as_absent() {
        // Test: get after elapsed > ttl returns None and removes the entry
        let (mut cache, clock) = clocked_cache(10, 1_000_000);

        cache.set("ephemeral", "v".to_string(), Some(Duration::from_millis(50)));
        assert!(cache.get("ephemeral").is_some());

        clock.store(51, Ordering::SeqCst);
        assert!(cache.get("ephemeral").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_is_fresh_window_and_stats() {
        // Test: fresh within window (hit), stale beyond it (miss),
        // absent key (miss)
        let (mut cache, clock) = clocked_cache(10, 1_000_000);
        let window = Duration::from_millis(100);

        cache.set("k", "v".to_string(), None);
        assert!(cache.is_fresh("k", window));

        clock.store(150, Ordering::SeqCst);
        assert!(!cache.is_fresh("k", window));
        assert!(!cache.is_fresh("absent", window));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_stats_track_hits_misses() {
        // Test: hit rate derived from hits/misses only
        let mut cache: MemoryCache<String> = MemoryCache::new(10, 1_000_000);

        cache.set("k", "v".to_string(), None);
        cache.get("k");
        cache.get("k");
        cache.get("absent");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_delete_and_clear() {
        // Test: delete reports presence; clear resets byte accounting
        let mut cache: MemoryCache<String> = MemoryCache::new(10, 1_000_000);

        cache.set("k", "v".to_string(), None);
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));

        cache.set("a", "1".to_string(), None);
        cache.set("b", "2".to_string(), None);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.estimated_bytes(), 0);
    }

    #[test]
    fn test_batch_variants() {
        // Test: set_many then get_many aligns results with input keys
        let mut cache: MemoryCache<String> = MemoryCache::new(10, 1_000_000);

        cache.set_many(
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ],
            None,
        );

        let got = cache.get_many(&["a".to_string(), "missing".to_string(), "b".to_string()]);
        assert_eq!(got[0].as_deref(), Some("1"));
        assert!(got[1].is_none());
        assert_eq!(got[2].as_deref(), Some("2"));
    }

    #[test]
    fn test_shed_drops_lru_first() {
        // Test: shedding removes oldest-access entries first
        let mut cache: MemoryCache<String> = MemoryCache::new(10, 1_000_000);

        cache.set("a", "1".to_string(), None);
        cache.set("b", "2".to_string(), None);
        cache.set("c", "3".to_string(), None);

        let dropped = cache.shed(2);
        assert_eq!(dropped, 2);
        assert!(!cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
    }

    #[test]
    fn test_peek_age_does_not_touch_lru() {
        // Test: a freshness probe must not protect an entry from eviction
        let mut cache: MemoryCache<String> = MemoryCache::new(2, 1_000_000);

        cache.set("old", "a".to_string(), None);
        cache.set("young", "b".to_string(), None);
        assert!(cache.peek_age("old").is_some());

        cache.set("newest", "c".to_string(), None);
        assert!(!cache.has("old"));
    }

    #[test]
    fn test_profile_size_estimate_recursive() {
        // Test: composite profile sizes exceed their string parts alone
        use crate::types::ProfileAnalysis;
        use num_traits::Zero;
        use std::collections::BTreeMap;

        let profile = AddressProfile {
            address: "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY".to_string(),
            transaction_count: 3,
            total_volume_sent: BigUint::from(1_000_000u64),
            total_volume_received: BigUint::zero(),
            avg_transaction_size: BigUint::from(333_333u64),
            counterparties: Vec::new(),
            hourly_activity: [0; 24],
            daily_activity: BTreeMap::new(),
            analysis: ProfileAnalysis {
                days_since_last_activity: 1,
                is_dormant: false,
                avg_daily_transactions: 3.0,
            },
        };

        let addr_only = profile.address.estimated_bytes();
        assert!(profile.estimated_bytes() > addr_only + 24 * 8);
    }
}
