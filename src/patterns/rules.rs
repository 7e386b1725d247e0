//! Per-profile pattern rules
//!
//! Pure functions of one profile: no shared state, no I/O. Executors run
//! these inline while batches are processed; the orchestrator re-runs them
//! through the matcher memo for cached profiles.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde_json::json;

use super::{Pattern, PatternType, Severity};
use crate::config::MonitorConfig;
use crate::types::AddressProfile;

/// Rule thresholds
///
/// These control detection sensitivity. The two wash-trading signals (the
/// reciprocal-counterparty heuristic here and the batch-level cycle search
/// in `graph`) intentionally keep separate thresholds.
mod rule_thresholds {
    // Dormant whale risk tiers
    pub const WHALE_VOLUME_TIER3_MULTIPLIER: u32 = 100; // >= 100x floor
    pub const WHALE_VOLUME_TIER2_MULTIPLIER: u32 = 10; // >= 10x floor
    pub const DORMANCY_TIER2_DAYS: u32 = 180;
    pub const DORMANCY_TIER1_DAYS: u32 = 90;
    pub const RISK_CRITICAL_MIN: u32 = 5;
    pub const RISK_HIGH_MIN: u32 = 3;

    // Sudden activity: recent 7 active days vs the preceding 23 (days 8-30)
    pub const SUDDEN_RECENT_DAYS: usize = 7;
    pub const SUDDEN_HISTORY_DAYS: usize = 23;
    pub const SUDDEN_RATIO_MIN: f64 = 5.0; // 500% increase
    pub const SUDDEN_RATIO_CRITICAL: f64 = 10.0;

    // Velocity change over a configurable window
    pub const VELOCITY_CHANGE_PCT_MIN: f64 = 200.0;
    pub const VELOCITY_CHANGE_PCT_HIGH: f64 = 500.0;

    // Per-profile wash-trading heuristic
    pub const WASH_MIN_COUNTERPARTIES: usize = 2;
    pub const WASH_MIN_TX_PER_COUNTERPARTY: u32 = 10;

    // Accumulation / distribution flow imbalance
    pub const FLOW_IMBALANCE_RATIO_MAX: f64 = 0.2;
}

/// Threshold holder for the per-profile rules
#[derive(Debug, Clone)]
pub struct PatternRules {
    /// Combined-volume floor for the dormant-whale rule (smallest units)
    pub whale_volume_floor: BigUint,

    /// Recent window, in active days, for the velocity-change rule
    pub velocity_window_days: usize,
}

impl PatternRules {
    pub fn new(whale_volume_floor: u64, velocity_window_days: usize) -> Self {
        Self {
            whale_volume_floor: BigUint::from(whale_volume_floor),
            velocity_window_days,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.whale_volume_floor, 7)
    }
}

impl Default for PatternRules {
    fn default() -> Self {
        Self::new(10_000, 7)
    }
}

/// Run every per-profile rule against one profile
pub fn evaluate_profile(profile: &AddressProfile, rules: &PatternRules, now: i64) -> Vec<Pattern> {
    let mut patterns = Vec::new();

    if let Some(p) = detect_dormant_whale(profile, rules, now) {
        patterns.push(p);
    }
    if let Some(p) = detect_sudden_activity(profile, now) {
        patterns.push(p);
    }
    if let Some(p) = detect_velocity_change(profile, rules, now) {
        patterns.push(p);
    }
    if let Some(p) = detect_wash_trading(profile, now) {
        patterns.push(p);
    }
    if let Some(p) = detect_flow_imbalance(profile, now) {
        patterns.push(p);
    }

    patterns
}

/// Dormant whale: flagged dormant by its own analysis, with combined volume
/// above the configured floor
///
/// Risk score is additive: volume tier 1-3, dormancy tier 0-2, plus an
/// average-transaction-size bonus of 0-1. Critical at >=5, high at >=3.
pub fn detect_dormant_whale(
    profile: &AddressProfile,
    rules: &PatternRules,
    now: i64,
) -> Option<Pattern> {
    use rule_thresholds::*;

    if !profile.analysis.is_dormant {
        return None;
    }

    let total_volume = profile.total_volume();
    if total_volume <= rules.whale_volume_floor {
        return None;
    }

    let floor = &rules.whale_volume_floor;
    let volume_tier: u32 = if total_volume >= floor * WHALE_VOLUME_TIER3_MULTIPLIER {
        3
    } else if total_volume >= floor * WHALE_VOLUME_TIER2_MULTIPLIER {
        2
    } else {
        1
    };

    let days_dormant = profile.analysis.days_since_last_activity;
    let dormancy_tier: u32 = if days_dormant >= DORMANCY_TIER2_DAYS {
        2
    } else if days_dormant >= DORMANCY_TIER1_DAYS {
        1
    } else {
        0
    };

    let size_bonus: u32 = if profile.avg_transaction_size >= *floor {
        1
    } else {
        0
    };

    let risk_score = volume_tier + dormancy_tier + size_bonus;
    let severity = if risk_score >= RISK_CRITICAL_MIN {
        Severity::Critical
    } else if risk_score >= RISK_HIGH_MIN {
        Severity::High
    } else {
        Severity::Medium
    };

    Some(
        Pattern::new(PatternType::DormantWhale, profile.address.clone(), now)
            .with_severity(severity)
            .with_evidence(json!({
                "days_dormant": days_dormant,
                "total_volume": total_volume.to_string(),
                "risk_score": risk_score,
            })),
    )
}

/// Sudden activity: mean of the most recent 7 active days exceeds 5x the
/// mean of the preceding 23 (days 8-30); both windows must be non-empty
pub fn detect_sudden_activity(profile: &AddressProfile, now: i64) -> Option<Pattern> {
    use rule_thresholds::*;

    let (recent_mean, historical_mean) =
        split_window_means(profile, SUDDEN_RECENT_DAYS, SUDDEN_HISTORY_DAYS)?;

    if historical_mean <= 0.0 {
        return None;
    }

    let ratio = recent_mean / historical_mean;
    if ratio <= SUDDEN_RATIO_MIN {
        return None;
    }

    let severity = if ratio > SUDDEN_RATIO_CRITICAL {
        Severity::Critical
    } else {
        Severity::High
    };

    Some(
        Pattern::new(PatternType::SuddenActivity, profile.address.clone(), now)
            .with_severity(severity)
            .with_evidence(json!({
                "recent_daily_mean": recent_mean,
                "historical_daily_mean": historical_mean,
                "increase_ratio": ratio,
            })),
    )
}

/// Velocity change: same recent-vs-historical comparison over a configurable
/// window; flags when the absolute percentage change exceeds 200%
pub fn detect_velocity_change(
    profile: &AddressProfile,
    rules: &PatternRules,
    now: i64,
) -> Option<Pattern> {
    use rule_thresholds::*;

    let window = rules.velocity_window_days;
    let history = window * 3;
    let (recent_mean, historical_mean) = split_window_means(profile, window, history)?;

    if historical_mean <= 0.0 {
        return None;
    }

    let change_pct = (recent_mean - historical_mean) / historical_mean * 100.0;
    if change_pct.abs() <= VELOCITY_CHANGE_PCT_MIN {
        return None;
    }

    let severity = if change_pct.abs() > VELOCITY_CHANGE_PCT_HIGH {
        Severity::High
    } else {
        Severity::Medium
    };

    Some(
        Pattern::new(PatternType::VelocityChange, profile.address.clone(), now)
            .with_severity(severity)
            .with_evidence(json!({
                "change_pct": change_pct,
                "recent_daily_mean": recent_mean,
                "historical_daily_mean": historical_mean,
                "window_days": window,
            })),
    )
}

/// Per-profile wash-trading heuristic: at least two counterparties each with
/// >=10 transactions and non-zero volume in both directions
///
/// Independent of the batch-level cycle detector in `graph`; the two signals
/// keep their own thresholds and evidence shapes.
pub fn detect_wash_trading(profile: &AddressProfile, now: i64) -> Option<Pattern> {
    use rule_thresholds::*;

    let qualifying: Vec<_> = profile
        .counterparties
        .iter()
        .filter(|c| {
            c.transaction_count >= WASH_MIN_TX_PER_COUNTERPARTY
                && !c.volume_sent.is_zero()
                && !c.volume_received.is_zero()
        })
        .collect();

    if qualifying.len() < WASH_MIN_COUNTERPARTIES {
        return None;
    }

    let bidirectional_volume: BigUint = qualifying.iter().map(|c| c.total_volume()).sum();
    let counterparty_addrs: Vec<&str> = qualifying.iter().map(|c| c.address.as_str()).collect();

    Some(
        Pattern::new(PatternType::WashTradingCycle, profile.address.clone(), now)
            .with_severity(Severity::High)
            .with_evidence(json!({
                "source": "reciprocal-counterparties",
                "counterparties": counterparty_addrs,
                "bidirectional_volume": bidirectional_volume.to_string(),
            })),
    )
}

/// Accumulation / distribution: sent-to-received (or inverse) volume ratio
/// below 0.2
pub fn detect_flow_imbalance(profile: &AddressProfile, now: i64) -> Option<Pattern> {
    use rule_thresholds::*;

    let sent = profile.total_volume_sent.to_f64().unwrap_or(f64::MAX);
    let received = profile.total_volume_received.to_f64().unwrap_or(f64::MAX);

    if sent <= 0.0 && received <= 0.0 {
        return None;
    }

    let net_differential = if profile.total_volume_received >= profile.total_volume_sent {
        &profile.total_volume_received - &profile.total_volume_sent
    } else {
        &profile.total_volume_sent - &profile.total_volume_received
    };

    // Accumulation: barely sending relative to receiving
    if received > 0.0 && sent / received < FLOW_IMBALANCE_RATIO_MAX {
        return Some(
            Pattern::new(PatternType::Accumulation, profile.address.clone(), now)
                .with_severity(Severity::Medium)
                .with_evidence(json!({
                    "sent_to_received_ratio": sent / received,
                    "net_differential": net_differential.to_string(),
                })),
        );
    }

    // Distribution: barely receiving relative to sending
    if sent > 0.0 && received / sent < FLOW_IMBALANCE_RATIO_MAX {
        return Some(
            Pattern::new(PatternType::Distribution, profile.address.clone(), now)
                .with_severity(Severity::Medium)
                .with_evidence(json!({
                    "received_to_sent_ratio": received / sent,
                    "net_differential": net_differential.to_string(),
                })),
        );
    }

    None
}

/// Means over the most recent `recent` active days and the `history` active
/// days preceding them; `None` unless both windows are non-empty
fn split_window_means(
    profile: &AddressProfile,
    recent: usize,
    history: usize,
) -> Option<(f64, f64)> {
    let counts = profile.daily_counts();
    if counts.len() <= recent {
        return None;
    }

    let recent_slice = &counts[counts.len() - recent..];
    let history_start = counts.len().saturating_sub(recent + history);
    let history_slice = &counts[history_start..counts.len() - recent];
    if history_slice.is_empty() {
        return None;
    }

    let mean = |s: &[u32]| s.iter().map(|&c| c as f64).sum::<f64>() / s.len() as f64;
    Some((mean(recent_slice), mean(history_slice)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CounterpartyStats, ProfileAnalysis};
    use std::collections::BTreeMap;

    const NOW: i64 = 1_770_000_000;

    fn base_profile(address: &str) -> AddressProfile {
        AddressProfile {
            address: address.to_string(),
            transaction_count: 0,
            total_volume_sent: BigUint::zero(),
            total_volume_received: BigUint::zero(),
            avg_transaction_size: BigUint::zero(),
            counterparties: Vec::new(),
            hourly_activity: [0; 24],
            daily_activity: BTreeMap::new(),
            analysis: ProfileAnalysis {
                days_since_last_activity: 0,
                is_dormant: false,
                avg_daily_transactions: 0.0,
            },
        }
    }

    fn with_daily(profile: &mut AddressProfile, counts: &[u32]) {
        for (i, &count) in counts.iter().enumerate() {
            profile
                .daily_activity
                .insert(format!("2026-01-{:02}", i + 1), count);
        }
    }

    #[test]
    fn test_dormant_whale_high_at_modest_volume() {
        // Scenario: dormant 200 days, volume 5x the 10,000 floor
        // volume tier 1 + dormancy tier 2 = 3 -> high
        let mut profile = base_profile("whale_1");
        profile.analysis.is_dormant = true;
        profile.analysis.days_since_last_activity = 200;
        profile.total_volume_sent = BigUint::from(30_000u32);
        profile.total_volume_received = BigUint::from(20_000u32);

        let rules = PatternRules::default();
        let pattern = detect_dormant_whale(&profile, &rules, NOW).unwrap();

        assert_eq!(pattern.pattern_type, PatternType::DormantWhale);
        assert_eq!(pattern.severity, Severity::High);
        assert_eq!(pattern.evidence["days_dormant"], 200);
        assert_eq!(pattern.evidence["risk_score"], 3);
    }

    #[test]
    fn test_dormant_whale_critical_at_large_volume() {
        // Scenario: dormant 200 days, volume 200x the floor
        // volume tier 3 + dormancy tier 2 = 5 -> critical
        let mut profile = base_profile("whale_2");
        profile.analysis.is_dormant = true;
        profile.analysis.days_since_last_activity = 200;
        profile.total_volume_sent = BigUint::from(2_000_000u32);

        let rules = PatternRules::default();
        let pattern = detect_dormant_whale(&profile, &rules, NOW).unwrap();

        assert_eq!(pattern.severity, Severity::Critical);
        assert_eq!(pattern.evidence["risk_score"], 5);
    }

    #[test]
    fn test_dormant_whale_requires_dormancy_flag() {
        // Test: volume alone is not enough
        let mut profile = base_profile("active_whale");
        profile.total_volume_sent = BigUint::from(5_000_000u32);

        let rules = PatternRules::default();
        assert!(detect_dormant_whale(&profile, &rules, NOW).is_none());
    }

    #[test]
    fn test_dormant_whale_respects_volume_floor() {
        // Test: dormant with volume at/below the floor is not a whale
        let mut profile = base_profile("small_dormant");
        profile.analysis.is_dormant = true;
        profile.analysis.days_since_last_activity = 400;
        profile.total_volume_sent = BigUint::from(10_000u32); // == floor

        let rules = PatternRules::default();
        assert!(detect_dormant_whale(&profile, &rules, NOW).is_none());
    }

    #[test]
    fn test_sudden_activity_flags_spike() {
        // Test: 23 quiet days then 7 days at >5x the earlier mean
        let mut profile = base_profile("spiker");
        let mut counts = vec![2u32; 23];
        counts.extend(vec![15u32; 7]); // 7.5x the historical mean
        with_daily(&mut profile, &counts);

        let pattern = detect_sudden_activity(&profile, NOW).unwrap();
        assert_eq!(pattern.pattern_type, PatternType::SuddenActivity);
        assert_eq!(pattern.severity, Severity::High);
    }

    #[test]
    fn test_sudden_activity_needs_both_windows() {
        // Edge case: fewer than 8 active days cannot form both windows
        let mut profile = base_profile("newcomer");
        with_daily(&mut profile, &[9, 9, 9, 9, 9, 9, 9]);

        assert!(detect_sudden_activity(&profile, NOW).is_none());
    }

    #[test]
    fn test_sudden_activity_ignores_mild_growth() {
        // Test: 3x growth is below the 5x trigger
        let mut profile = base_profile("grower");
        let mut counts = vec![4u32; 23];
        counts.extend(vec![12u32; 7]);
        with_daily(&mut profile, &counts);

        assert!(detect_sudden_activity(&profile, NOW).is_none());
    }

    #[test]
    fn test_velocity_change_flags_drop() {
        // Test: activity collapsing by more than 200% change magnitude is
        // impossible downward (bounded at -100%), so verify the upward side
        // and that a strong surge above 500% is high severity
        let mut profile = base_profile("velocity");
        let mut counts = vec![2u32; 21];
        counts.extend(vec![16u32; 7]); // +700%
        with_daily(&mut profile, &counts);

        let rules = PatternRules::default();
        let pattern = detect_velocity_change(&profile, &rules, NOW).unwrap();
        assert_eq!(pattern.pattern_type, PatternType::VelocityChange);
        assert_eq!(pattern.severity, Severity::High);
    }

    #[test]
    fn test_wash_trading_requires_two_reciprocal_counterparties() {
        // Test: two counterparties with >=10 txs and flow both ways flag;
        // one-way flow does not qualify
        let mut profile = base_profile("washer");
        profile.counterparties = vec![
            CounterpartyStats {
                address: "cp_1".to_string(),
                transaction_count: 12,
                volume_sent: BigUint::from(500u32),
                volume_received: BigUint::from(480u32),
            },
            CounterpartyStats {
                address: "cp_2".to_string(),
                transaction_count: 11,
                volume_sent: BigUint::from(300u32),
                volume_received: BigUint::from(310u32),
            },
            CounterpartyStats {
                address: "cp_one_way".to_string(),
                transaction_count: 50,
                volume_sent: BigUint::from(9_999u32),
                volume_received: BigUint::zero(),
            },
        ];

        let pattern = detect_wash_trading(&profile, NOW).unwrap();
        assert_eq!(pattern.severity, Severity::High);
        let cps = pattern.evidence["counterparties"].as_array().unwrap();
        assert_eq!(cps.len(), 2);
        // 500+480+300+310 across the two qualifying counterparties
        assert_eq!(pattern.evidence["bidirectional_volume"], "1590");
    }

    #[test]
    fn test_wash_trading_single_counterparty_not_enough() {
        // Test: one reciprocal counterparty is below the threshold
        let mut profile = base_profile("half_washer");
        profile.counterparties = vec![CounterpartyStats {
            address: "cp".to_string(),
            transaction_count: 40,
            volume_sent: BigUint::from(100u32),
            volume_received: BigUint::from(100u32),
        }];

        assert!(detect_wash_trading(&profile, NOW).is_none());
    }

    #[test]
    fn test_accumulation_and_distribution() {
        // Test: heavy inflow -> accumulation; heavy outflow -> distribution
        let mut accumulator = base_profile("sink");
        accumulator.total_volume_sent = BigUint::from(100u32);
        accumulator.total_volume_received = BigUint::from(10_000u32);

        let pattern = detect_flow_imbalance(&accumulator, NOW).unwrap();
        assert_eq!(pattern.pattern_type, PatternType::Accumulation);
        assert_eq!(pattern.evidence["net_differential"], "9900");

        let mut distributor = base_profile("source");
        distributor.total_volume_sent = BigUint::from(10_000u32);
        distributor.total_volume_received = BigUint::from(100u32);

        let pattern = detect_flow_imbalance(&distributor, NOW).unwrap();
        assert_eq!(pattern.pattern_type, PatternType::Distribution);
    }

    #[test]
    fn test_balanced_flow_not_flagged() {
        // Test: near-equal flow in both directions is normal
        let mut profile = base_profile("balanced");
        profile.total_volume_sent = BigUint::from(5_000u32);
        profile.total_volume_received = BigUint::from(6_000u32);

        assert!(detect_flow_imbalance(&profile, NOW).is_none());
    }
}
