//! Monitor event stream
//!
//! The orchestrator publishes these on an unbounded channel; consumers
//! (the runtime binary, integration tests) subscribe and render or assert.
//! Events are snapshots, never handles into live state.

use crate::patterns::Pattern;
use serde::Serialize;

/// Events emitted across a monitoring run
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// Monitoring loop started with this many tracked addresses
    MonitoringStarted { address_count: usize },

    /// One full or incremental scan finished
    ScanCompleted {
        full_scan: bool,
        duration_ms: u64,
        addresses_processed: u64,
        patterns_detected: usize,
        memory_usage_mb: u64,
    },

    /// Patterns found during a scan, batch-level detectors included
    PatternsDetected { patterns: Vec<Pattern> },

    /// Periodic metrics snapshot between scans
    MetricsUpdate {
        accounts_processed: u64,
        transfers_analyzed: u64,
        cache_hit_rate: f64,
        cache_entries: usize,
        memory_usage_mb: u64,
    },

    /// Monitoring loop stopped, partial scan work discarded
    MonitoringStopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        // Test: events carry a machine-readable tag for downstream routing
        let event = MonitorEvent::MonitoringStarted { address_count: 12 };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "monitoring_started");
        assert_eq!(json["address_count"], 12);
    }
}
