//! Whalewatch: parallel ledger-address monitoring engine
//!
//! Watches a set of ledger addresses for behavioral patterns: dormant
//! whales waking up, sudden activity spikes, wash-trading cycles, address
//! clusters. History comes from an injected [`fetch::HistoryProvider`];
//! everything else (worker pool, profile cache, memory pressure handling,
//! pattern detection, scan scheduling) lives in this crate.
//!
//! Typical embedding:
//! ```no_run
//! use std::sync::Arc;
//! use whalewatch::config::MonitorConfig;
//! use whalewatch::engine::Orchestrator;
//! # use whalewatch::fetch::HistoryProvider;
//! # fn provider() -> Arc<dyn HistoryProvider> { unimplemented!() }
//!
//! # async fn run() {
//! let config = MonitorConfig::from_env();
//! let addresses = vec!["address_1".to_string()];
//! let (orchestrator, mut events) = Orchestrator::new(config, addresses, provider());
//!
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         println!("{}", serde_json::to_string(&event).unwrap());
//!     }
//! });
//! orchestrator.run().await;
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod fetch;
pub mod memory;
pub mod patterns;
pub mod types;

pub use config::MonitorConfig;
pub use engine::{MonitorEvent, Orchestrator, PerformanceReport};
pub use patterns::{Pattern, PatternType, Severity};
pub use types::{Address, AddressProfile, TransferRecord};
