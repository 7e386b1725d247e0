//! Monitor configuration from environment variables

use std::env;

/// Configuration for the monitoring engine
///
/// Loaded from environment variables with sensible defaults. The worker
/// count and batch size defaults mirror the usual tuning (cores − 1, 50
/// addresses per batch) but are plain knobs, not invariants.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Number of parallel batch executors
    pub worker_count: usize,

    /// Addresses per batch
    pub batch_size: usize,

    /// Cache ceiling: maximum entry count
    pub cache_max_entries: usize,

    /// Cache ceiling: maximum estimated bytes
    pub cache_max_bytes: usize,

    /// Cache TTL for profiles, seconds (0 disables TTL)
    pub cache_ttl_secs: u64,

    /// Process memory ceiling in MB
    pub memory_limit_mb: u64,

    /// Memory sampling interval in milliseconds
    pub memory_sample_interval_ms: u64,

    /// Full-scan interval in milliseconds
    pub full_scan_interval_ms: u64,

    /// Incremental update interval in milliseconds; also the cache
    /// freshness window for skipping re-fetches
    pub update_interval_ms: u64,

    /// Volume floor (smallest units) for the dormant-whale rule
    pub whale_volume_floor: u64,

    /// Days of inactivity after which an address counts as dormant
    pub dormant_after_days: u32,

    /// Bit count of the dormant-address membership filter
    pub bloom_filter_bits: usize,

    /// Max pages to drain per address from the history provider
    pub max_history_pages: u32,
}

impl MonitorConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `WW_WORKER_COUNT` (default: available cores − 1, minimum 1)
    /// - `WW_BATCH_SIZE` (default: 50)
    /// - `WW_CACHE_MAX_ENTRIES` (default: 10000)
    /// - `WW_CACHE_MAX_BYTES` (default: 52428800, i.e. 50 MB)
    /// - `WW_CACHE_TTL_SECS` (default: 3600)
    /// - `WW_MEMORY_LIMIT_MB` (default: 512)
    /// - `WW_MEMORY_SAMPLE_INTERVAL_MS` (default: 5000)
    /// - `WW_FULL_SCAN_INTERVAL_MS` (default: 300000)
    /// - `WW_UPDATE_INTERVAL_MS` (default: 60000)
    /// - `WW_WHALE_VOLUME_FLOOR` (default: 10000)
    /// - `WW_DORMANT_AFTER_DAYS` (default: 30)
    /// - `WW_BLOOM_FILTER_BITS` (default: 65536)
    /// - `WW_MAX_HISTORY_PAGES` (default: 20)
    pub fn from_env() -> Self {
        Self {
            worker_count: env::var("WW_WORKER_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_worker_count),

            batch_size: env::var("WW_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(50),

            cache_max_entries: env::var("WW_CACHE_MAX_ENTRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10_000),

            cache_max_bytes: env::var("WW_CACHE_MAX_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(50 * 1024 * 1024),

            cache_ttl_secs: env::var("WW_CACHE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3_600),

            memory_limit_mb: env::var("WW_MEMORY_LIMIT_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(512),

            memory_sample_interval_ms: env::var("WW_MEMORY_SAMPLE_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5_000),

            full_scan_interval_ms: env::var("WW_FULL_SCAN_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300_000),

            update_interval_ms: env::var("WW_UPDATE_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60_000),

            whale_volume_floor: env::var("WW_WHALE_VOLUME_FLOOR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10_000),

            dormant_after_days: env::var("WW_DORMANT_AFTER_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),

            bloom_filter_bits: env::var("WW_BLOOM_FILTER_BITS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(65_536),

            max_history_pages: env::var("WW_MAX_HISTORY_PAGES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),
        }
    }
}

impl Default for MonitorConfig {
    /// Defaults without touching the environment, for tests and embedding
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            batch_size: 50,
            cache_max_entries: 10_000,
            cache_max_bytes: 50 * 1024 * 1024,
            cache_ttl_secs: 3_600,
            memory_limit_mb: 512,
            memory_sample_interval_ms: 5_000,
            full_scan_interval_ms: 300_000,
            update_interval_ms: 60_000,
            whale_volume_floor: 10_000,
            dormant_after_days: 30,
            bloom_filter_bits: 65_536,
            max_history_pages: 20,
        }
    }
}

/// Available cores minus one, floored at one executor
fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_worker_count_at_least_one() {
        // Test: worker count never drops below 1, even on single-core hosts
        assert!(default_worker_count() >= 1);
    }

    #[test]
    fn test_custom_config_from_env() {
        // Test: env vars override defaults
        env::set_var("WW_BATCH_SIZE", "25");
        env::set_var("WW_MEMORY_LIMIT_MB", "128");
        env::set_var("WW_WHALE_VOLUME_FLOOR", "500000");

        let config = MonitorConfig::from_env();

        assert_eq!(config.batch_size, 25);
        assert_eq!(config.memory_limit_mb, 128);
        assert_eq!(config.whale_volume_floor, 500_000);

        // Cleanup
        env::remove_var("WW_BATCH_SIZE");
        env::remove_var("WW_MEMORY_LIMIT_MB");
        env::remove_var("WW_WHALE_VOLUME_FLOOR");
    }

    #[test]
    fn test_unset_vars_fall_back_to_defaults() {
        // Test: defaults when env vars absent
        env::remove_var("WW_CACHE_MAX_ENTRIES");
        env::remove_var("WW_UPDATE_INTERVAL_MS");

        let config = MonitorConfig::from_env();

        assert_eq!(config.cache_max_entries, 10_000);
        assert_eq!(config.update_interval_ms, 60_000);
        assert_eq!(config.dormant_after_days, 30);
    }
}
