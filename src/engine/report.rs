//! End-of-run performance report
//!
//! Assembled by the orchestrator from its own counters plus cache and
//! memory snapshots. Serializes to JSON for downstream tooling and renders
//! a human summary through the log.

use serde::Serialize;

use crate::memory::MemoryStats;

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub scans_completed: u64,
    pub full_scans: u64,
    pub accounts_processed: u64,
    pub transfers_analyzed: u64,
    pub patterns_detected: u64,

    /// Task-level failures (a whole batch rejected or lost)
    pub batch_errors: u64,

    /// Per-address failures (fetch errors, malformed history), isolated
    /// inside otherwise-successful batches
    pub address_errors: u64,
    pub elapsed_secs: f64,
    /// Accounts per second over the whole run
    pub processing_rate: f64,
    pub cache_hit_rate: f64,
    pub cache_entries: usize,
    pub cache_bytes: u64,
    pub worker_count: usize,
    pub worker_utilization: f64,
    pub memory: MemoryStats,
    pub hints: Vec<String>,
}

impl PerformanceReport {
    /// Flag the obvious tuning levers based on observed ratios
    pub fn derive_hints(&mut self) {
        self.hints.clear();
        if self.cache_hit_rate < 0.5 && self.accounts_processed > 0 {
            self.hints.push(format!(
                "cache hit rate {:.0}% is low; consider raising WW_CACHE_MAX_ENTRIES or WW_UPDATE_INTERVAL_MS",
                self.cache_hit_rate * 100.0
            ));
        }
        if self.worker_utilization > 0.9 {
            self.hints.push(
                "workers near saturation; consider raising WW_WORKER_COUNT".to_string(),
            );
        }
        if self.memory.limit_mb > 0 {
            let peak_fraction = self.memory.peak_mb / self.memory.limit_mb as f64;
            if peak_fraction >= 0.9 {
                self.hints.push(format!(
                    "peak memory {:.0}MB reached {:.0}% of the {}MB limit",
                    self.memory.peak_mb,
                    peak_fraction * 100.0,
                    self.memory.limit_mb
                ));
            }
        }
        if self.address_errors > 0 && self.address_errors * 10 >= self.accounts_processed.max(1) {
            self.hints
                .push("more than 10% of lookups failed; check the history provider".to_string());
        }
    }

    /// Log the report in a readable block
    pub fn log_summary(&self) {
        log::info!("📊 Performance report");
        log::info!(
            "   Scans: {} ({} full) over {:.1}s",
            self.scans_completed,
            self.full_scans,
            self.elapsed_secs
        );
        log::info!(
            "   Accounts: {} processed ({:.1}/s), {} transfers analyzed",
            self.accounts_processed,
            self.processing_rate,
            self.transfers_analyzed
        );
        log::info!(
            "   Patterns: {} detected, {} batch errors, {} address errors",
            self.patterns_detected,
            self.batch_errors,
            self.address_errors
        );
        log::info!(
            "   Cache: {:.0}% hit rate, {} entries, {} KB",
            self.cache_hit_rate * 100.0,
            self.cache_entries,
            self.cache_bytes / 1024
        );
        log::info!(
            "   Workers: {} at {:.0}% utilization",
            self.worker_count,
            self.worker_utilization * 100.0
        );
        log::info!(
            "   Memory: {:.0}MB current, {:.0}MB peak of {}MB limit, {} collection passes",
            self.memory.current_mb,
            self.memory.peak_mb,
            self.memory.limit_mb,
            self.memory.collections
        );
        for hint in &self.hints {
            log::info!("   💡 {}", hint);
        }
    }
}
