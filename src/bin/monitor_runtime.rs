//! Standalone monitor runtime
//!
//! Watches the addresses listed in `WW_ADDRESSES` (comma-separated).
//! Without an external indexer wired in, runs against a synthetic history
//! provider so the whole engine can be exercised end to end:
//!
//! ```text
//! WW_ADDRESSES=addr1,addr2 RUST_LOG=info cargo run --bin monitor_runtime
//! ```

use async_trait::async_trait;
use num_bigint::BigUint;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::sync::Mutex;

use whalewatch::config::MonitorConfig;
use whalewatch::engine::Orchestrator;
use whalewatch::fetch::{HistoryProvider, ProviderError};
use whalewatch::types::{Address, TransferRecord};

/// Deterministic synthetic transfer history, seeded per address
///
/// Roughly one in five addresses is shaped as a dormant whale so the
/// pattern pipeline has something to find.
struct SyntheticProvider {
    rng: Mutex<StdRng>,
}

impl SyntheticProvider {
    fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl HistoryProvider for SyntheticProvider {
    async fn fetch_page(
        &self,
        address: &Address,
        page: u32,
    ) -> Result<Option<Vec<TransferRecord>>, ProviderError> {
        if page > 0 {
            return Ok(None);
        }

        let mut rng = self.rng.lock().await;
        let now = chrono::Utc::now().timestamp();

        let whale = rng.gen_ratio(1, 5);
        let transfer_count = rng.gen_range(3..40);
        let base_age_days: i64 = if whale {
            rng.gen_range(120..400)
        } else {
            rng.gen_range(0..20)
        };

        let mut transfers = Vec::with_capacity(transfer_count);
        for i in 0..transfer_count {
            let amount: u64 = if whale {
                rng.gen_range(1_000_000..50_000_000)
            } else {
                rng.gen_range(10..5_000)
            };
            let counterparty = format!("peer_{}", rng.gen_range(0..8));
            let outgoing = rng.gen_bool(0.5);
            let timestamp = now - base_age_days * 86_400 - (i as i64) * rng.gen_range(600..86_400);

            transfers.push(TransferRecord {
                from: if outgoing {
                    address.clone()
                } else {
                    counterparty.clone()
                },
                to: if outgoing { counterparty } else { address.clone() },
                amount: BigUint::from(amount),
                timestamp,
            });
        }

        Ok(Some(transfers))
    }
}

fn addresses_from_env() -> Vec<Address> {
    match std::env::var("WW_ADDRESSES") {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => {
            // Demo set: enough addresses to fill several batches
            (0..120).map(|i| format!("demo_address_{:03}", i)).collect()
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = MonitorConfig::from_env();
    let addresses = addresses_from_env();

    log::info!("🚀 Starting whalewatch monitor...");
    log::info!("📊 Configuration:");
    log::info!("   Addresses: {}", addresses.len());
    log::info!("   Workers: {}", config.worker_count);
    log::info!("   Batch size: {}", config.batch_size);
    log::info!(
        "   Cache: {} entries / {} MB, TTL {}s",
        config.cache_max_entries,
        config.cache_max_bytes / (1024 * 1024),
        config.cache_ttl_secs
    );
    log::info!("   Memory limit: {} MB", config.memory_limit_mb);
    log::info!(
        "   Intervals: full scan {}s, update {}s",
        config.full_scan_interval_ms / 1000,
        config.update_interval_ms / 1000
    );

    let provider = Arc::new(SyntheticProvider::new(42));
    let (orchestrator, mut events) = Orchestrator::new(config, addresses, provider);
    let orchestrator = Arc::new(orchestrator);

    // Event stream to stdout as JSON lines; logs stay on stderr
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => log::warn!("⚠️  Unserializable event: {}", e),
            }
        }
    });

    let runner = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run().await })
    };

    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("🛑 Ctrl-C received, shutting down..."),
        Err(e) => log::error!("❌ Signal handler failed: {}", e),
    }
    orchestrator.stop();

    if let Err(e) = runner.await {
        log::error!("❌ Monitor task panicked: {}", e);
    }
    // Dropping the orchestrator drops the event sender; printer drains and exits
    drop(orchestrator);
    let _ = printer.await;
}
