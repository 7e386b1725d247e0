//! Batch executor: per-address profile building and rule evaluation
//!
//! Runs inside one worker with no mutable state shared with the rest of the
//! process; addresses are processed sequentially to bound per-worker memory.
//! A failing address is counted and skipped, never aborts the batch. Cache
//! writes happen later in the orchestrator; executors only produce values.

use chrono::{DateTime, Timelike};
use num_bigint::BigUint;
use num_traits::Zero;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::TaskError;
use crate::config::MonitorConfig;
use crate::fetch::{drain_history, HistoryProvider};
use crate::patterns::rules::{self, PatternRules};
use crate::types::{
    Address, AddressProfile, BatchResult, CounterpartyStats, ProfileAnalysis, TransferRecord,
};

/// Counterparty list bound per profile (top entries by transaction count)
const MAX_COUNTERPARTIES: usize = 50;

/// Seconds per day, for dormancy math
const DAY_SECS: i64 = 86_400;

/// Executes one batch of addresses against the history provider
///
/// The provider handle is shared immutably; everything mutable lives in the
/// executor's own stack frames.
pub struct BatchExecutor {
    provider: Arc<dyn HistoryProvider>,
    rules: PatternRules,
    dormant_after_days: u32,
    max_history_pages: u32,
}

impl BatchExecutor {
    pub fn new(provider: Arc<dyn HistoryProvider>, config: &MonitorConfig) -> Self {
        Self {
            provider,
            rules: PatternRules::from_config(config),
            dormant_after_days: config.dormant_after_days,
            max_history_pages: config.max_history_pages,
        }
    }

    /// Process a batch: one profile plus per-profile patterns per address
    ///
    /// Per-address provider failures increment `errors` and are skipped;
    /// only a malformed batch is a task-level error.
    pub async fn run(&self, batch: &[Address], now: i64) -> Result<BatchResult, TaskError> {
        if batch.is_empty() {
            return Err(TaskError::Malformed("empty batch".to_string()));
        }

        let mut result = BatchResult::default();

        for address in batch {
            match drain_history(self.provider.as_ref(), address, self.max_history_pages).await {
                Ok(transfers) => {
                    result.metrics.transfers_analyzed += transfers.len() as u64;
                    let profile = Arc::new(build_profile(
                        address,
                        &transfers,
                        self.dormant_after_days,
                        now,
                    ));
                    result
                        .patterns
                        .extend(rules::evaluate_profile(&profile, &self.rules, now));
                    result.profiles.push(profile);
                    result.metrics.processed += 1;
                }
                Err(e) => {
                    log::debug!("⚠️  Skipping {}: {}", address, e);
                    result.metrics.errors += 1;
                }
            }
        }

        Ok(result)
    }
}

/// Derive an immutable profile from an address's transfer history
///
/// Dormancy is computed here and nowhere else: an address is dormant when
/// its last activity is at least `dormant_after_days` old. An address with
/// no history at all is dormant with zero volume.
pub fn build_profile(
    address: &Address,
    transfers: &[TransferRecord],
    dormant_after_days: u32,
    now: i64,
) -> AddressProfile {
    let mut total_sent = BigUint::zero();
    let mut total_received = BigUint::zero();
    let mut hourly_activity = [0u32; 24];
    let mut daily_activity: BTreeMap<String, u32> = BTreeMap::new();
    let mut counterparties: HashMap<String, CounterpartyStats> = HashMap::new();
    let mut last_activity: Option<i64> = None;

    for transfer in transfers {
        let outgoing = transfer.from == *address;
        let incoming = transfer.to == *address;
        if !outgoing && !incoming {
            // Provider returned an unrelated transfer; ignore it
            continue;
        }

        if outgoing {
            total_sent += &transfer.amount;
            let link = counterparty_entry(&mut counterparties, &transfer.to);
            link.transaction_count += 1;
            link.volume_sent += &transfer.amount;
        }
        if incoming {
            total_received += &transfer.amount;
            let link = counterparty_entry(&mut counterparties, &transfer.from);
            link.transaction_count += 1;
            link.volume_received += &transfer.amount;
        }

        if let Some(moment) = DateTime::from_timestamp(transfer.timestamp, 0) {
            hourly_activity[moment.hour() as usize] += 1;
            *daily_activity
                .entry(moment.format("%Y-%m-%d").to_string())
                .or_insert(0) += 1;
        }

        last_activity = Some(last_activity.map_or(transfer.timestamp, |t| t.max(transfer.timestamp)));
    }

    // Self-transfers are counted once in the transaction count even though
    // they touch both volume totals
    let transaction_count = transfers
        .iter()
        .filter(|t| t.from == *address || t.to == *address)
        .count() as u32;

    let avg_transaction_size = if transaction_count > 0 {
        (&total_sent + &total_received) / BigUint::from(transaction_count)
    } else {
        BigUint::zero()
    };

    // Bound the counterparty list to the strongest links
    let mut links: Vec<CounterpartyStats> = counterparties.into_values().collect();
    links.sort_by(|a, b| {
        b.transaction_count
            .cmp(&a.transaction_count)
            .then_with(|| a.address.cmp(&b.address))
    });
    links.truncate(MAX_COUNTERPARTIES);

    let days_since_last_activity = match last_activity {
        Some(last) => ((now - last).max(0) / DAY_SECS) as u32,
        None => u32::MAX,
    };

    let active_days = daily_activity.len().max(1);
    let analysis = ProfileAnalysis {
        days_since_last_activity,
        is_dormant: days_since_last_activity >= dormant_after_days,
        avg_daily_transactions: transaction_count as f64 / active_days as f64,
    };

    AddressProfile {
        address: address.clone(),
        transaction_count,
        total_volume_sent: total_sent,
        total_volume_received: total_received,
        avg_transaction_size,
        counterparties: links,
        hourly_activity,
        daily_activity,
        analysis,
    }
}

fn counterparty_entry<'a>(
    counterparties: &'a mut HashMap<String, CounterpartyStats>,
    address: &str,
) -> &'a mut CounterpartyStats {
    counterparties
        .entry(address.to_string())
        .or_insert_with(|| CounterpartyStats {
            address: address.to_string(),
            transaction_count: 0,
            volume_sent: BigUint::zero(),
            volume_received: BigUint::zero(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ProviderError;
    use async_trait::async_trait;

    const NOW: i64 = 1_772_000_000;

    fn transfer(from: &str, to: &str, amount: u64, timestamp: i64) -> TransferRecord {
        TransferRecord {
            from: from.to_string(),
            to: to.to_string(),
            amount: BigUint::from(amount),
            timestamp,
        }
    }

    /// Fixture provider: one page per address from a fixed map
    struct FixtureProvider {
        history: HashMap<String, Vec<TransferRecord>>,
        failing: Vec<String>,
    }

    #[async_trait]
    impl HistoryProvider for FixtureProvider {
        async fn fetch_page(
            &self,
            address: &Address,
            page: u32,
        ) -> Result<Option<Vec<TransferRecord>>, ProviderError> {
            if self.failing.contains(address) {
                return Err(ProviderError::fatal("address unavailable"));
            }
            if page > 0 {
                return Ok(None);
            }
            Ok(Some(self.history.get(address).cloned().unwrap_or_default()))
        }
    }

    fn executor_with(history: HashMap<String, Vec<TransferRecord>>, failing: Vec<String>) -> BatchExecutor {
        let provider = Arc::new(FixtureProvider { history, failing });
        BatchExecutor::new(provider, &MonitorConfig::default())
    }

    #[test]
    fn test_build_profile_aggregates_directions() {
        // Test: sent/received split, counterparty links, counts
        let transfers = vec![
            transfer("me", "cp_a", 100, NOW - 1_000),
            transfer("me", "cp_a", 200, NOW - 2_000),
            transfer("cp_a", "me", 50, NOW - 3_000),
            transfer("cp_b", "me", 500, NOW - 4_000),
        ];

        let profile = build_profile(&"me".to_string(), &transfers, 30, NOW);

        assert_eq!(profile.transaction_count, 4);
        assert_eq!(profile.total_volume_sent, BigUint::from(300u32));
        assert_eq!(profile.total_volume_received, BigUint::from(550u32));
        // (300 + 550) / 4
        assert_eq!(profile.avg_transaction_size, BigUint::from(212u32));

        let cp_a = profile
            .counterparties
            .iter()
            .find(|c| c.address == "cp_a")
            .unwrap();
        assert_eq!(cp_a.transaction_count, 3);
        assert_eq!(cp_a.volume_sent, BigUint::from(300u32));
        assert_eq!(cp_a.volume_received, BigUint::from(50u32));
    }

    #[test]
    fn test_build_profile_dormancy_derived() {
        // Test: is_dormant follows days since last activity
        let recent = vec![transfer("me", "cp", 10, NOW - DAY_SECS)];
        let profile = build_profile(&"me".to_string(), &recent, 30, NOW);
        assert!(!profile.analysis.is_dormant);
        assert_eq!(profile.analysis.days_since_last_activity, 1);

        let old = vec![transfer("me", "cp", 10, NOW - 200 * DAY_SECS)];
        let profile = build_profile(&"me".to_string(), &old, 30, NOW);
        assert!(profile.analysis.is_dormant);
        assert_eq!(profile.analysis.days_since_last_activity, 200);
    }

    #[test]
    fn test_build_profile_empty_history() {
        // Edge case: an address with no transfers is dormant, zero volume
        let profile = build_profile(&"ghost".to_string(), &[], 30, NOW);

        assert_eq!(profile.transaction_count, 0);
        assert!(profile.analysis.is_dormant);
        assert!(profile.total_volume().is_zero());
        assert!(profile.counterparties.is_empty());
    }

    #[test]
    fn test_build_profile_hour_and_day_buckets() {
        // Test: timestamps land in the right histogram buckets
        // 1772000000 = 2026-02-25 06:13:20 UTC
        let transfers = vec![
            transfer("me", "cp", 1, 1_772_000_000),
            transfer("me", "cp", 1, 1_772_000_100),
        ];

        let profile = build_profile(&"me".to_string(), &transfers, 30, NOW + 10_000);

        assert_eq!(profile.hourly_activity[6], 2);
        assert_eq!(profile.daily_activity.get("2026-02-25"), Some(&2));
    }

    #[tokio::test]
    async fn test_run_counts_failures_without_aborting() {
        // Test: a failing address is counted, the rest still process
        let mut history = HashMap::new();
        history.insert(
            "good_1".to_string(),
            vec![transfer("good_1", "cp", 100, NOW - 500)],
        );
        history.insert(
            "good_2".to_string(),
            vec![transfer("cp", "good_2", 100, NOW - 500)],
        );

        let executor = executor_with(history, vec!["bad".to_string()]);
        let batch = vec![
            "good_1".to_string(),
            "bad".to_string(),
            "good_2".to_string(),
        ];

        let result = executor.run(&batch, NOW).await.unwrap();

        assert_eq!(result.metrics.processed, 2);
        assert_eq!(result.metrics.errors, 1);
        assert_eq!(result.metrics.transfers_analyzed, 2);
        assert_eq!(result.profiles.len(), 2);
    }

    #[tokio::test]
    async fn test_run_rejects_empty_batch() {
        // Edge case: empty batch is malformed, a task-level error
        let executor = executor_with(HashMap::new(), Vec::new());

        let result = executor.run(&[], NOW).await;
        assert!(matches!(result, Err(TaskError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_run_emits_per_profile_patterns() {
        // Test: a dormant whale in the batch produces its pattern inline
        let mut history = HashMap::new();
        history.insert(
            "whale".to_string(),
            vec![transfer("whale", "cp", 5_000_000, NOW - 200 * DAY_SECS)],
        );

        let executor = executor_with(history, Vec::new());
        let result = executor.run(&["whale".to_string()], NOW).await.unwrap();

        assert!(result
            .patterns
            .iter()
            .any(|p| p.pattern_type == crate::patterns::PatternType::DormantWhale));
    }
}
