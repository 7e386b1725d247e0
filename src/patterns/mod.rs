//! Behavioral pattern records and detection layers
//!
//! Two tiers of detection produce `Pattern` values:
//! - per-profile rules (`rules`): pure functions of one profile
//! - batch-level analysis (`baseline`, `graph`): operate over many profiles
//!
//! Patterns are derived facts. They are never persisted by this crate;
//! collaborators receive them through events and do what they want.

pub mod baseline;
pub mod bloom;
pub mod graph;
pub mod matcher;
pub mod rules;

use serde::{Deserialize, Serialize};

use crate::types::Address;

/// Kind of behavioral pattern detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternType {
    DormantWhale,
    SuddenActivity,
    VelocityChange,
    WashTradingCycle,
    Accumulation,
    Distribution,
    AddressCluster,
    UnusualActivity,
}

/// Alert severity tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

/// One detected behavioral pattern
///
/// `evidence` carries the type-specific fields (days dormant, cycle volume,
/// KL divergence, ...) as JSON so downstream alerting can republish the
/// record without knowing every rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_type: PatternType,
    pub severity: Severity,

    /// One or more addresses this pattern refers to
    pub addresses: Vec<Address>,

    pub evidence: serde_json::Value,

    /// Unix timestamp (seconds) of detection
    pub detected_at: i64,
}

impl Pattern {
    pub fn new(pattern_type: PatternType, address: Address, detected_at: i64) -> Self {
        Self {
            pattern_type,
            severity: Severity::Medium,
            addresses: vec![address],
            evidence: serde_json::Value::Null,
            detected_at,
        }
    }

    pub fn with_addresses(mut self, addresses: Vec<Address>) -> Self {
        self.addresses = addresses;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_evidence(mut self, evidence: serde_json::Value) -> Self {
        self.evidence = evidence;
        self
    }
}
