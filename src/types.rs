//! Core data structures for address monitoring
//!
//! Profiles are the unit of analysis: one immutable record per address,
//! produced by a batch executor and shared behind `Arc`. All volume fields
//! use `BigUint` in the ledger's smallest unit so large-balance addresses
//! can never silently overflow a 64-bit integer.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Opaque address identifier; the unit of work across the whole engine.
pub type Address = String;

/// One raw transfer returned by the history provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub from: Address,
    pub to: Address,

    /// Amount in the ledger's smallest unit
    pub amount: BigUint,

    /// Unix timestamp (seconds)
    pub timestamp: i64,
}

/// Aggregated per-counterparty statistics
///
/// Directional volumes are kept separate because the wash-trading heuristic
/// requires non-zero flow in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterpartyStats {
    pub address: Address,
    pub transaction_count: u32,

    /// Volume this profile's address sent to the counterparty
    pub volume_sent: BigUint,

    /// Volume this profile's address received from the counterparty
    pub volume_received: BigUint,
}

impl CounterpartyStats {
    /// Combined volume in both directions
    pub fn total_volume(&self) -> BigUint {
        &self.volume_sent + &self.volume_received
    }
}

/// Derived activity summary for one address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileAnalysis {
    pub days_since_last_activity: u32,

    /// Derived from `days_since_last_activity` against the configured
    /// dormancy threshold; never set directly.
    pub is_dormant: bool,

    pub avg_daily_transactions: f64,
}

/// Immutable activity profile for one address
///
/// Built once by a batch executor from the address's transfer history.
/// Updates replace the whole record; cache entries hold `Arc<AddressProfile>`
/// so shared copies are always safe to read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressProfile {
    pub address: Address,
    pub transaction_count: u32,

    /// Never negative by construction (BigUint)
    pub total_volume_sent: BigUint,
    pub total_volume_received: BigUint,

    /// Integer mean transfer size in smallest units (0 when no transfers)
    pub avg_transaction_size: BigUint,

    /// Bounded list of top counterparties by transaction count
    pub counterparties: Vec<CounterpartyStats>,

    /// 24-bucket histogram of activity by UTC hour
    pub hourly_activity: [u32; 24],

    /// Activity count per UTC day, keyed "YYYY-MM-DD" (sorted ascending)
    pub daily_activity: BTreeMap<String, u32>,

    pub analysis: ProfileAnalysis,
}

impl AddressProfile {
    /// Combined sent + received volume
    pub fn total_volume(&self) -> BigUint {
        &self.total_volume_sent + &self.total_volume_received
    }

    /// Average transaction size as f64 for ratio math (lossy, display only)
    pub fn avg_transaction_size_f64(&self) -> f64 {
        self.avg_transaction_size.to_f64().unwrap_or(f64::MAX)
    }

    /// Daily counts ordered oldest-first (BTreeMap keys sort by date)
    pub fn daily_counts(&self) -> Vec<u32> {
        self.daily_activity.values().copied().collect()
    }
}

/// Counters accumulated while executing one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub processed: u64,
    pub errors: u64,
    pub transfers_analyzed: u64,
}

impl BatchMetrics {
    /// Fold another batch's counters into this one (commutative)
    pub fn absorb(&mut self, other: &BatchMetrics) {
        self.processed += other.processed;
        self.errors += other.errors;
        self.transfers_analyzed += other.transfers_analyzed;
    }
}

/// Result of executing one batch of addresses
///
/// Merging is commutative and associative: the scheduler gives no completion
/// ordering guarantee across batches, so aggregation must not depend on it.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub profiles: Vec<Arc<AddressProfile>>,
    pub patterns: Vec<crate::patterns::Pattern>,
    pub metrics: BatchMetrics,
}

impl BatchResult {
    /// Merge another batch result into this one, order-independently
    pub fn merge(&mut self, other: BatchResult) {
        self.profiles.extend(other.profiles);
        self.patterns.extend(other.patterns);
        self.metrics.absorb(&other.metrics);
    }
}

/// Convenience constructor for a zero volume
pub fn zero_volume() -> BigUint {
    BigUint::zero()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with_volume(address: &str, sent: u64, received: u64) -> AddressProfile {
        AddressProfile {
            address: address.to_string(),
            transaction_count: 1,
            total_volume_sent: BigUint::from(sent),
            total_volume_received: BigUint::from(received),
            avg_transaction_size: BigUint::from(sent + received),
            counterparties: Vec::new(),
            hourly_activity: [0; 24],
            daily_activity: BTreeMap::new(),
            analysis: ProfileAnalysis {
                days_since_last_activity: 0,
                is_dormant: false,
                avg_daily_transactions: 1.0,
            },
        }
    }

    #[test]
    fn test_total_volume_sums_both_directions() {
        // Test: total_volume() = sent + received
        let profile = profile_with_volume("addr_1", 700, 300);
        assert_eq!(profile.total_volume(), BigUint::from(1_000u32));
    }

    #[test]
    fn test_merge_is_commutative() {
        // Test: a.merge(b) and b.merge(a) yield identical counters and
        // identical profile/pattern sets
        let a = BatchResult {
            profiles: vec![Arc::new(profile_with_volume("a", 10, 0))],
            patterns: Vec::new(),
            metrics: BatchMetrics {
                processed: 3,
                errors: 1,
                transfers_analyzed: 40,
            },
        };
        let b = BatchResult {
            profiles: vec![Arc::new(profile_with_volume("b", 0, 20))],
            patterns: Vec::new(),
            metrics: BatchMetrics {
                processed: 5,
                errors: 0,
                transfers_analyzed: 60,
            },
        };

        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b.clone();
        ba.merge(a.clone());

        assert_eq!(ab.metrics, ba.metrics);
        assert_eq!(ab.metrics.processed, 8);
        assert_eq!(ab.metrics.transfers_analyzed, 100);

        // Same profile set regardless of merge order
        let mut ab_addrs: Vec<_> = ab.profiles.iter().map(|p| p.address.clone()).collect();
        let mut ba_addrs: Vec<_> = ba.profiles.iter().map(|p| p.address.clone()).collect();
        ab_addrs.sort();
        ba_addrs.sort();
        assert_eq!(ab_addrs, ba_addrs);
    }

    #[test]
    fn test_merge_is_associative() {
        // Test: (a+b)+c == a+(b+c) for counters
        let mk = |p: u64| BatchResult {
            profiles: Vec::new(),
            patterns: Vec::new(),
            metrics: BatchMetrics {
                processed: p,
                errors: p % 2,
                transfers_analyzed: p * 10,
            },
        };

        let mut left = mk(1);
        let mut mid = mk(2);
        mid.merge(mk(3));
        left.merge(mid);

        let mut right = mk(1);
        right.merge(mk(2));
        right.merge(mk(3));

        assert_eq!(left.metrics, right.metrics);
    }

    #[test]
    fn test_daily_counts_ordered_by_date() {
        // Test: BTreeMap keys keep daily counts oldest-first
        let mut profile = profile_with_volume("addr_2", 1, 1);
        profile.daily_activity.insert("2026-03-02".to_string(), 5);
        profile.daily_activity.insert("2026-03-01".to_string(), 2);
        profile.daily_activity.insert("2026-03-03".to_string(), 9);

        assert_eq!(profile.daily_counts(), vec![2, 5, 9]);
    }
}
