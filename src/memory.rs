//! Heap-pressure monitoring and mitigation signaling
//!
//! Samples process resident memory on a timer, classifies pressure against a
//! configured ceiling, and notifies registered listeners when data must be
//! shed. Rust has no collector to invoke, so a "collection pass" here means
//! recording the pass and signaling listeners (cache prune, queue shed);
//! when nothing can be freed the manager degrades to monitoring and logging,
//! never to an error.
//!
//! Thresholds: ≥80% of the ceiling is Warning (schedule a deferred pass),
//! ≥90% is Critical (immediate multi-pass collection plus an
//! emergency-cleanup signal to every listener).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

/// Warning threshold as a fraction of the ceiling
const WARNING_FRACTION: f64 = 0.80;

/// Critical threshold as a fraction of the ceiling
const CRITICAL_FRACTION: f64 = 0.90;

/// Passes run on a critical crossing
const FORCED_COLLECTION_PASSES: u64 = 2;

/// Pressure classification for one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureLevel {
    Normal,
    Warning,
    Critical,
}

/// Signal delivered to registered listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySignal {
    /// A deferred collection pass was scheduled (warning threshold crossed)
    CollectionScheduled,

    /// Critical threshold crossed; listeners must shed cached/queued data
    EmergencyCleanupRequired,
}

/// Point-in-time memory figures; process-wide, reset only on restart
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MemoryStats {
    pub current_mb: f64,
    pub peak_mb: f64,
    pub limit_mb: u64,
    pub collections: u64,
}

/// Returns current process memory usage in bytes
pub type UsageProbe = Box<dyn Fn() -> u64 + Send + Sync>;

/// Listener invoked on pressure signals; failures are isolated per-listener
pub type PressureListener =
    Box<dyn Fn(MemorySignal) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

struct MemoryState {
    peak_bytes: u64,
    collections: u64,
    pending_collection: bool,
}

/// Process heap-pressure manager
///
/// The usage probe is injectable (teacher-style `now_fn`) so tests can walk
/// usage through the thresholds deterministically; the default probe reads
/// resident memory via `sysinfo`.
pub struct MemoryManager {
    limit_bytes: u64,
    probe: UsageProbe,
    state: Mutex<MemoryState>,
    listeners: Mutex<Vec<PressureListener>>,
    sampler: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl MemoryManager {
    /// Create a manager with the default sysinfo resident-memory probe
    pub fn new(limit_mb: u64) -> Self {
        Self::new_with_probe(limit_mb, default_probe())
    }

    /// Create a manager with an injected usage probe (for tests)
    pub fn new_with_probe(limit_mb: u64, probe: UsageProbe) -> Self {
        Self {
            limit_bytes: limit_mb * 1024 * 1024,
            probe,
            state: Mutex::new(MemoryState {
                peak_bytes: 0,
                collections: 0,
                pending_collection: false,
            }),
            listeners: Mutex::new(Vec::new()),
            sampler: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Register a pressure listener (cache manager, orchestrator)
    pub fn add_listener(&self, listener: PressureListener) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// Spawn the background sampling task
    pub fn start(self: &Arc<Self>, interval_ms: u64) {
        let manager = Arc::clone(self);
        self.stopped.store(false, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            log::info!("🧠 Memory sampler started (interval: {}ms)", interval_ms);
            let mut timer = interval(Duration::from_millis(interval_ms));
            loop {
                timer.tick().await;
                if manager.stopped.load(Ordering::SeqCst) {
                    break;
                }
                manager.sample_once();
            }
            log::info!("🧠 Memory sampler stopped");
        });

        *self.sampler.lock().unwrap() = Some(handle);
    }

    /// Stop the background sampling task
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self.sampler.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Take one sample, classify pressure, and run any due mitigation
    ///
    /// Order per tick: run a previously deferred pass first, then classify
    /// the current reading and schedule/force as needed.
    pub fn sample_once(&self) -> PressureLevel {
        let usage = (self.probe)();

        // Run a pass deferred from an earlier warning tick
        let deferred_due = {
            let mut state = self.state.lock().unwrap();
            state.peak_bytes = state.peak_bytes.max(usage);
            let due = state.pending_collection;
            state.pending_collection = false;
            due
        };
        if deferred_due {
            self.collection_pass(1);
        }

        let level = self.classify(usage);
        match level {
            PressureLevel::Critical => {
                log::warn!(
                    "🚨 Memory critical: {:.1} MB of {} MB ceiling",
                    bytes_to_mb(usage),
                    self.limit_bytes / (1024 * 1024)
                );
                self.collection_pass(FORCED_COLLECTION_PASSES);
                self.notify(MemorySignal::EmergencyCleanupRequired);
            }
            PressureLevel::Warning => {
                let mut state = self.state.lock().unwrap();
                if !state.pending_collection {
                    state.pending_collection = true;
                    drop(state);
                    log::info!(
                        "⚠️  Memory warning: {:.1} MB, scheduling collection pass",
                        bytes_to_mb(usage)
                    );
                    self.notify(MemorySignal::CollectionScheduled);
                }
            }
            PressureLevel::Normal => {}
        }

        level
    }

    /// Current usage in MB from a fresh probe read
    pub fn current_usage_mb(&self) -> f64 {
        bytes_to_mb((self.probe)())
    }

    /// Running peak usage in MB
    pub fn peak_usage_mb(&self) -> f64 {
        bytes_to_mb(self.state.lock().unwrap().peak_bytes)
    }

    /// Whether usage is at or above the warning threshold (80%)
    pub fn is_near_limit(&self) -> bool {
        self.classify((self.probe)()) != PressureLevel::Normal
    }

    /// Whether usage is at or above the critical threshold (90%)
    pub fn is_critical(&self) -> bool {
        self.classify((self.probe)()) == PressureLevel::Critical
    }

    /// Whether a deferred collection pass is waiting for the next tick
    pub fn has_pending_collection(&self) -> bool {
        self.state.lock().unwrap().pending_collection
    }

    /// Snapshot of current/peak/collection figures
    pub fn stats(&self) -> MemoryStats {
        let state = self.state.lock().unwrap();
        MemoryStats {
            current_mb: bytes_to_mb((self.probe)()),
            peak_mb: bytes_to_mb(state.peak_bytes),
            limit_mb: self.limit_bytes / (1024 * 1024),
            collections: state.collections,
        }
    }

    fn classify(&self, usage: u64) -> PressureLevel {
        let ratio = usage as f64 / self.limit_bytes as f64;
        if ratio >= CRITICAL_FRACTION {
            PressureLevel::Critical
        } else if ratio >= WARNING_FRACTION {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }

    /// Record `passes` collection passes
    ///
    /// No runtime collection trigger exists here; the pass count feeds the
    /// stats contract and the actual freeing is done by listeners.
    fn collection_pass(&self, passes: u64) {
        let mut state = self.state.lock().unwrap();
        state.collections += passes;
        log::debug!("♻️  Collection pass recorded ({} total)", state.collections);
    }

    /// Deliver a signal to every listener, isolating per-listener failures
    fn notify(&self, signal: MemorySignal) {
        let listeners = self.listeners.lock().unwrap();
        for (idx, listener) in listeners.iter().enumerate() {
            if let Err(e) = listener(signal) {
                log::error!("❌ Memory listener {} failed on {:?}: {}", idx, signal, e);
            }
        }
    }
}

fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Default probe: resident memory of this process via sysinfo
fn default_probe() -> UsageProbe {
    let pid = sysinfo::Pid::from_u32(std::process::id());
    let system = Mutex::new(sysinfo::System::new());
    Box::new(move || {
        let mut system = system.lock().unwrap();
        system.refresh_process(pid);
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    })
}
