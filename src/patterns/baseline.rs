//! Batch-level activity baseline and deviation detection
//!
//! The baseline is computed once per batch: mean daily-transaction count,
//! mean average transaction size, and a normalized 24-bucket hourly
//! distribution across every input profile. Individual profiles are then
//! compared back against it; strong deviations in frequency, transaction
//! size, or hour-of-day timing (Kullback–Leibler divergence) are reported
//! as unusual activity.

use serde_json::json;
use std::sync::Arc;

use super::{Pattern, PatternType, Severity};
use crate::types::AddressProfile;

/// Deviation thresholds against the batch baseline
mod baseline_thresholds {
    /// Frequency ratio above which activity count is anomalous (300%)
    pub const FREQUENCY_RATIO_MAX: f64 = 3.0;

    /// Average-transaction-size ratio bounds (10x either way)
    pub const SIZE_RATIO_MAX: f64 = 10.0;
    pub const SIZE_RATIO_MIN: f64 = 0.1;

    /// KL divergence above which hourly timing is anomalous
    pub const KL_DIVERGENCE_MAX: f64 = 1.0;

    /// Smoothing floor for empty histogram buckets
    pub const EPSILON: f64 = 1e-9;
}

/// Batch-wide activity baseline
#[derive(Debug, Clone)]
pub struct ActivityBaseline {
    pub mean_daily_transactions: f64,
    pub mean_avg_transaction_size: f64,

    /// Normalized 24-bucket hourly distribution (sums to 1.0)
    pub hourly_distribution: [f64; 24],

    pub profile_count: usize,
}

impl ActivityBaseline {
    /// Compute the baseline over a batch of profiles
    ///
    /// Returns `None` for an empty batch; a baseline over nothing flags
    /// everything.
    pub fn compute(profiles: &[Arc<AddressProfile>]) -> Option<Self> {
        if profiles.is_empty() {
            return None;
        }

        let n = profiles.len() as f64;
        let mean_daily_transactions = profiles
            .iter()
            .map(|p| p.analysis.avg_daily_transactions)
            .sum::<f64>()
            / n;
        let mean_avg_transaction_size = profiles
            .iter()
            .map(|p| p.avg_transaction_size_f64())
            .sum::<f64>()
            / n;

        let mut hourly_totals = [0u64; 24];
        for profile in profiles {
            for (bucket, &count) in profile.hourly_activity.iter().enumerate() {
                hourly_totals[bucket] += count as u64;
            }
        }
        let hourly_distribution = normalize(&hourly_totals).unwrap_or([1.0 / 24.0; 24]);

        Some(Self {
            mean_daily_transactions,
            mean_avg_transaction_size,
            hourly_distribution,
            profile_count: profiles.len(),
        })
    }
}

/// Compare one profile against the batch baseline
///
/// Emits a single unusual-activity pattern listing every deviation found;
/// two or more deviations raise the severity to high.
pub fn detect_deviations(
    profile: &AddressProfile,
    baseline: &ActivityBaseline,
    now: i64,
) -> Option<Pattern> {
    use baseline_thresholds::*;

    let mut deviations = Vec::new();
    let mut evidence = serde_json::Map::new();

    if baseline.mean_daily_transactions > 0.0 {
        let frequency_ratio = profile.analysis.avg_daily_transactions / baseline.mean_daily_transactions;
        if frequency_ratio > FREQUENCY_RATIO_MAX {
            deviations.push("frequency");
            evidence.insert("frequency_ratio".to_string(), json!(frequency_ratio));
        }
    }

    if baseline.mean_avg_transaction_size > 0.0 {
        let size_ratio = profile.avg_transaction_size_f64() / baseline.mean_avg_transaction_size;
        if size_ratio > SIZE_RATIO_MAX || (size_ratio > 0.0 && size_ratio < SIZE_RATIO_MIN) {
            deviations.push("transaction-size");
            evidence.insert("size_ratio".to_string(), json!(size_ratio));
        }
    }

    if let Some(profile_hours) = normalize_u32(&profile.hourly_activity) {
        let divergence = kl_divergence(&profile_hours, &baseline.hourly_distribution);
        if divergence > KL_DIVERGENCE_MAX {
            deviations.push("hourly-timing");
            evidence.insert("kl_divergence".to_string(), json!(divergence));
        }
    }

    if deviations.is_empty() {
        return None;
    }

    let severity = if deviations.len() >= 2 {
        Severity::High
    } else {
        Severity::Medium
    };
    evidence.insert("deviations".to_string(), json!(deviations));
    evidence.insert(
        "baseline_profiles".to_string(),
        json!(baseline.profile_count),
    );

    Some(
        Pattern::new(PatternType::UnusualActivity, profile.address.clone(), now)
            .with_severity(severity)
            .with_evidence(serde_json::Value::Object(evidence)),
    )
}

/// Kullback–Leibler divergence D(p ‖ q) over 24 hourly buckets
///
/// Zero buckets are smoothed with a small epsilon so the sum stays finite.
pub fn kl_divergence(p: &[f64; 24], q: &[f64; 24]) -> f64 {
    use baseline_thresholds::EPSILON;

    p.iter()
        .zip(q.iter())
        .map(|(&pi, &qi)| {
            let pi = pi.max(EPSILON);
            let qi = qi.max(EPSILON);
            pi * (pi / qi).ln()
        })
        .sum()
}

fn normalize(histogram: &[u64; 24]) -> Option<[f64; 24]> {
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return None;
    }
    let mut out = [0.0; 24];
    for (bucket, &count) in histogram.iter().enumerate() {
        out[bucket] = count as f64 / total as f64;
    }
    Some(out)
}

fn normalize_u32(histogram: &[u32; 24]) -> Option<[f64; 24]> {
    let mut widened = [0u64; 24];
    for (bucket, &count) in histogram.iter().enumerate() {
        widened[bucket] = count as u64;
    }
    normalize(&widened)
}
