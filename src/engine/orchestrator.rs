//! Scan-cycle orchestration
//!
//! Owns the shared state the workers never touch: the profile cache, the
//! memory manager, the memoizing pattern matcher, and the run counters.
//! Workers only receive address batches and return results; every cache
//! write happens here, so no locking discipline is needed beyond the
//! scheduler's message-passing boundary.
//!
//! Two cycle types run on one timer:
//! - full scan: every address whose cache entry is missing or stale
//! - incremental update: only recently-active or unknown addresses
//! A due full scan always supersedes an incremental update.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};

use super::events::MonitorEvent;
use super::executor::BatchExecutor;
use super::report::PerformanceReport;
use super::scheduler::WorkerPool;
use super::TaskError;
use crate::cache::MemoryCache;
use crate::config::MonitorConfig;
use crate::fetch::HistoryProvider;
use crate::memory::{MemoryManager, MemorySignal};
use crate::patterns::matcher::PatternMatcher;
use crate::patterns::rules::PatternRules;
use crate::patterns::{baseline, graph, Pattern};
use crate::types::{Address, AddressProfile, BatchResult};

/// Incremental updates re-process addresses active within this many days
const INCREMENTAL_ACTIVITY_WINDOW_DAYS: u32 = 7;

/// Fraction of cache entries shed on an emergency cleanup signal
const EMERGENCY_SHED_DIVISOR: usize = 4;

#[derive(Default)]
struct RunCounters {
    scans_completed: u64,
    full_scans: u64,
    accounts_processed: u64,
    transfers_analyzed: u64,
    patterns_detected: u64,
    batch_errors: u64,
    address_errors: u64,
}

/// Drives scan cycles over a fixed address set
pub struct Orchestrator {
    config: MonitorConfig,
    addresses: Vec<Address>,
    pool: WorkerPool,
    cache: Arc<Mutex<MemoryCache<Arc<AddressProfile>>>>,
    memory: Arc<MemoryManager>,
    matcher: Mutex<PatternMatcher>,
    events: mpsc::UnboundedSender<MonitorEvent>,
    counters: Mutex<RunCounters>,
    stopping: AtomicBool,
    stop_notify: Notify,
    started_at: Instant,
}

impl Orchestrator {
    /// Build the engine around an injected history provider
    ///
    /// Returns the receiving end of the event stream alongside the
    /// orchestrator; drop it if events are not needed.
    pub fn new(
        config: MonitorConfig,
        addresses: Vec<Address>,
        provider: Arc<dyn HistoryProvider>,
    ) -> (Self, mpsc::UnboundedReceiver<MonitorEvent>) {
        let executor = Arc::new(BatchExecutor::new(provider, &config));
        let pool = WorkerPool::new(executor, config.worker_count);

        let cache = Arc::new(Mutex::new(MemoryCache::new(
            config.cache_max_entries,
            config.cache_max_bytes,
        )));

        let memory = Arc::new(MemoryManager::new(config.memory_limit_mb));
        let cache_for_listener = Arc::clone(&cache);
        memory.add_listener(Box::new(move |signal| {
            if signal == MemorySignal::EmergencyCleanupRequired {
                let mut cache = cache_for_listener.lock().unwrap();
                let target = (cache.len() / EMERGENCY_SHED_DIVISOR).max(1);
                let dropped = cache.shed(target);
                log::warn!("🚨 Emergency cleanup: shed {} cached profiles", dropped);
            }
            Ok(())
        }));

        let matcher = Mutex::new(PatternMatcher::new(
            PatternRules::from_config(&config),
            config.bloom_filter_bits,
        ));

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let orchestrator = Self {
            config,
            addresses,
            pool,
            cache,
            memory,
            matcher,
            events: events_tx,
            counters: Mutex::new(RunCounters::default()),
            stopping: AtomicBool::new(false),
            stop_notify: Notify::new(),
            started_at: Instant::now(),
        };

        (orchestrator, events_rx)
    }

    /// Run the monitoring loop until `stop()` is called
    ///
    /// Starts with an immediate full scan, then alternates per the timer:
    /// incremental updates every update interval, a full scan whenever the
    /// full-scan interval has elapsed.
    pub async fn run(&self) {
        log::info!(
            "🚀 Monitoring {} addresses with {} workers",
            self.addresses.len(),
            self.pool.worker_count()
        );
        self.emit(MonitorEvent::MonitoringStarted {
            address_count: self.addresses.len(),
        });

        self.memory.start(self.config.memory_sample_interval_ms);

        self.scan_full().await;
        let mut last_full = Instant::now();

        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.update_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.reset();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    if last_full.elapsed()
                        >= Duration::from_millis(self.config.full_scan_interval_ms)
                    {
                        self.scan_full().await;
                        last_full = Instant::now();
                    } else {
                        self.scan_incremental().await;
                    }
                    self.emit_metrics();
                }
                _ = self.stop_notify.notified() => {
                    break;
                }
            }
        }

        self.pool.shutdown().await;
        self.memory.stop();
        self.emit(MonitorEvent::MonitoringStopped);
        self.report().log_summary();
        log::info!("🛑 Monitoring stopped");
    }

    /// Request shutdown; in-flight batches finish, queued ones are failed,
    /// partial scan results are discarded
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        // notify_one stores a permit, so a stop that lands mid-scan is not
        // lost before the loop reaches the next await
        self.stop_notify.notify_one();
    }

    /// Full scan: refresh every missing or stale address, then run the
    /// batch-level detectors over the whole cached profile set
    pub async fn scan_full(&self) {
        let started = Instant::now();
        let now_ts = chrono::Utc::now().timestamp();

        let candidates = self.stale_addresses();
        log::info!(
            "🔍 Full scan: {} of {} addresses need refresh",
            candidates.len(),
            self.addresses.len()
        );

        let merged = self.process_in_batches(candidates, now_ts).await;
        if self.stopping.load(Ordering::SeqCst) {
            log::info!("🛑 Stop requested mid-scan; discarding partial results");
            return;
        }

        let refreshed: HashSet<Address> =
            merged.profiles.iter().map(|p| p.address.clone()).collect();
        self.absorb_results(&merged);

        let mut patterns = merged.patterns.clone();

        // Replay or re-evaluate per-profile rules for addresses served
        // straight from the cache this scan
        let snapshot = self.cache.lock().unwrap().snapshot_values();
        {
            let mut matcher = self.matcher.lock().unwrap();
            for profile in snapshot.iter().filter(|p| !refreshed.contains(&p.address)) {
                patterns.extend(matcher.evaluate(profile, now_ts));
            }
        }

        patterns.extend(batch_level_patterns(&snapshot, now_ts));

        self.finish_scan(true, started, merged.metrics.processed, patterns);
    }

    /// Incremental update: only unknown addresses and those with recent
    /// activity whose cache entry has gone stale
    pub async fn scan_incremental(&self) {
        let started = Instant::now();
        let now_ts = chrono::Utc::now().timestamp();

        let candidates = self.incremental_candidates();
        if candidates.is_empty() {
            log::debug!("🔍 Incremental update: nothing to refresh");
            self.finish_scan(false, started, 0, Vec::new());
            return;
        }
        log::info!(
            "🔍 Incremental update: refreshing {} active addresses",
            candidates.len()
        );

        let merged = self.process_in_batches(candidates, now_ts).await;
        if self.stopping.load(Ordering::SeqCst) {
            log::info!("🛑 Stop requested mid-scan; discarding partial results");
            return;
        }

        self.absorb_results(&merged);
        let patterns = merged.patterns.clone();

        self.finish_scan(false, started, merged.metrics.processed, patterns);
    }

    /// Snapshot run counters into a performance report
    pub fn report(&self) -> PerformanceReport {
        let counters = self.counters.lock().unwrap();
        let cache = self.cache.lock().unwrap();
        let cache_stats = cache.stats();
        let elapsed_secs = self.started_at.elapsed().as_secs_f64();

        let mut report = PerformanceReport {
            scans_completed: counters.scans_completed,
            full_scans: counters.full_scans,
            accounts_processed: counters.accounts_processed,
            transfers_analyzed: counters.transfers_analyzed,
            patterns_detected: counters.patterns_detected,
            batch_errors: counters.batch_errors,
            address_errors: counters.address_errors,
            elapsed_secs,
            processing_rate: if elapsed_secs > 0.0 {
                counters.accounts_processed as f64 / elapsed_secs
            } else {
                0.0
            },
            cache_hit_rate: cache_stats.hit_rate(),
            cache_entries: cache.len(),
            cache_bytes: cache.estimated_bytes() as u64,
            worker_count: self.pool.worker_count(),
            worker_utilization: self.pool.utilization(),
            memory: self.memory.stats(),
            hints: Vec::new(),
        };
        report.derive_hints();
        report
    }

    /// Addresses with no cache entry or one older than the update interval
    fn stale_addresses(&self) -> Vec<Address> {
        let freshness = Duration::from_millis(self.config.update_interval_ms);
        let mut cache = self.cache.lock().unwrap();
        self.addresses
            .iter()
            .filter(|addr| !cache.is_fresh(addr, freshness))
            .cloned()
            .collect()
    }

    /// Stale addresses restricted to unknown or recently-active profiles
    ///
    /// Dormant addresses are left to the full scan; their memoized pattern
    /// lists stay valid between full scans anyway.
    fn incremental_candidates(&self) -> Vec<Address> {
        let freshness = Duration::from_millis(self.config.update_interval_ms);
        let mut cache = self.cache.lock().unwrap();
        let by_address: HashMap<Address, Arc<AddressProfile>> = cache
            .snapshot_values()
            .into_iter()
            .map(|p| (p.address.clone(), p))
            .collect();

        self.addresses
            .iter()
            .filter(|addr| {
                if cache.is_fresh(addr, freshness) {
                    return false;
                }
                by_address
                    .get(addr.as_str())
                    .map(|p| {
                        p.analysis.days_since_last_activity < INCREMENTAL_ACTIVITY_WINDOW_DAYS
                    })
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    /// Partition, submit, and merge in whatever order batches complete
    ///
    /// A failed batch is logged and counted; the scan continues with the
    /// rest.
    async fn process_in_batches(&self, candidates: Vec<Address>, now_ts: i64) -> BatchResult {
        let mut receivers = Vec::new();
        for chunk in candidates.chunks(self.config.batch_size.max(1)) {
            receivers.push(self.pool.submit(chunk.to_vec(), now_ts));
        }

        let mut merged = BatchResult::default();
        for receiver in receivers {
            match receiver.await {
                Ok(Ok(result)) => merged.merge(result),
                Ok(Err(TaskError::Shutdown)) => {
                    log::debug!("Batch dropped by pool shutdown");
                }
                Ok(Err(e)) => {
                    log::error!("❌ Batch failed: {}", e);
                    self.counters.lock().unwrap().batch_errors += 1;
                }
                Err(_) => {
                    log::debug!("Batch completion channel closed");
                }
            }
        }
        merged
    }

    /// Write refreshed profiles into the cache and the matcher memo
    fn absorb_results(&self, merged: &BatchResult) {
        {
            let mut counters = self.counters.lock().unwrap();
            counters.transfers_analyzed += merged.metrics.transfers_analyzed;
            counters.address_errors += merged.metrics.errors;
        }

        let ttl = if self.config.cache_ttl_secs > 0 {
            Some(Duration::from_secs(self.config.cache_ttl_secs))
        } else {
            None
        };

        {
            let mut cache = self.cache.lock().unwrap();
            cache.set_many(
                merged
                    .profiles
                    .iter()
                    .map(|p| (p.address.clone(), Arc::clone(p)))
                    .collect(),
                ttl,
            );
        }

        let mut matcher = self.matcher.lock().unwrap();
        for profile in &merged.profiles {
            let own_patterns: Vec<Pattern> = merged
                .patterns
                .iter()
                .filter(|p| p.addresses.contains(&profile.address))
                .cloned()
                .collect();
            matcher.record(profile, &own_patterns);
        }
    }

    fn finish_scan(
        &self,
        full_scan: bool,
        started: Instant,
        processed: u64,
        patterns: Vec<Pattern>,
    ) {
        let duration_ms = started.elapsed().as_millis() as u64;
        let memory_usage_mb = self.memory.current_usage_mb() as u64;

        {
            let mut counters = self.counters.lock().unwrap();
            counters.scans_completed += 1;
            if full_scan {
                counters.full_scans += 1;
            }
            counters.accounts_processed += processed;
            counters.patterns_detected += patterns.len() as u64;
        }

        log::info!(
            "✅ {} completed in {}ms: {} addresses, {} patterns",
            if full_scan { "Full scan" } else { "Incremental update" },
            duration_ms,
            processed,
            patterns.len()
        );

        if !patterns.is_empty() {
            self.emit(MonitorEvent::PatternsDetected {
                patterns: patterns.clone(),
            });
        }
        self.emit(MonitorEvent::ScanCompleted {
            full_scan,
            duration_ms,
            addresses_processed: processed,
            patterns_detected: patterns.len(),
            memory_usage_mb,
        });
    }

    fn emit_metrics(&self) {
        let counters = self.counters.lock().unwrap();
        let cache = self.cache.lock().unwrap();
        self.emit(MonitorEvent::MetricsUpdate {
            accounts_processed: counters.accounts_processed,
            transfers_analyzed: counters.transfers_analyzed,
            cache_hit_rate: cache.stats().hit_rate(),
            cache_entries: cache.len(),
            memory_usage_mb: self.memory.current_usage_mb() as u64,
        });
    }

    fn emit(&self, event: MonitorEvent) {
        // Receiver may be dropped; events are advisory
        let _ = self.events.send(event);
    }
}

/// Batch-level detectors over a profile snapshot
fn batch_level_patterns(snapshot: &[Arc<AddressProfile>], now_ts: i64) -> Vec<Pattern> {
    let mut patterns = Vec::new();

    if let Some(activity_baseline) = baseline::ActivityBaseline::compute(snapshot) {
        patterns.extend(
            snapshot
                .iter()
                .filter_map(|p| baseline::detect_deviations(p, &activity_baseline, now_ts)),
        );
    }
    patterns.extend(graph::find_clusters(snapshot, now_ts));
    patterns.extend(graph::detect_cycles(snapshot, now_ts));

    patterns
}
