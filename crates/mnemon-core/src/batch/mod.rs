//! Batch Scheduler
//!
//! Two periodic jobs with independent intervals:
//!
//! - **cleanup** (default 5 min): forget-score analysis, deletions under
//!   one write transaction, buffer eviction, audit purge, WAL checkpoint
//! - **monitoring** (default 1 min): database size, item count, latency
//!   percentiles, threshold alerts with per-metric cooldown
//!
//! One job per kind at a time; overlapping ticks for the same kind are
//! dropped. `stop()` signals both jobs, which finish their current
//! transaction and exit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::Engine;
use crate::stats::LatencyPercentiles;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Batch scheduler configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub cleanup_interval: Duration,
    pub monitor_interval: Duration,
    /// Cleanup runs that exceed this are reported and abandoned
    pub cleanup_deadline: Duration,
    /// Minimum spacing between alerts for the same metric
    pub alert_cooldown: Duration,
    /// Database size alert levels in bytes
    pub db_warning_bytes: u64,
    pub db_critical_bytes: u64,
    /// p95 latency alert level in milliseconds
    pub latency_warning_ms: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(300),
            monitor_interval: Duration::from_secs(60),
            cleanup_deadline: Duration::from_secs(60),
            alert_cooldown: Duration::from_secs(300),
            db_warning_bytes: 512 * 1024 * 1024,
            db_critical_bytes: 2 * 1024 * 1024 * 1024,
            latency_warning_ms: 500.0,
        }
    }
}

/// One monitoring sample
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSample {
    pub at: DateTime<Utc>,
    pub item_count: i64,
    pub database_bytes: u64,
    pub latency: LatencyPercentiles,
    /// Resident set size where the platform exposes it
    pub process_memory_bytes: Option<u64>,
}

/// Sample the monitored metrics.
pub fn monitor_sample(engine: &Engine) -> MonitorSample {
    let stats = engine.stats().unwrap_or_default();
    MonitorSample {
        at: Utc::now(),
        item_count: stats.total_items,
        database_bytes: stats.database_bytes,
        latency: engine.metrics().latency.percentiles(),
        process_memory_bytes: process_memory_bytes(),
    }
}

#[cfg(target_os = "linux")]
fn process_memory_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn process_memory_bytes() -> Option<u64> {
    None
}

// ============================================================================
// ALERTING
// ============================================================================

/// Alert deduplication with per-metric cooldowns
struct AlertGate {
    cooldown: Duration,
    last_fired: HashMap<String, Instant>,
}

impl AlertGate {
    fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_fired: HashMap::new(),
        }
    }

    /// Whether an alert for `metric` may fire now
    fn allow(&mut self, metric: &str) -> bool {
        let now = Instant::now();
        match self.last_fired.get(metric) {
            Some(last) if now.duration_since(*last) < self.cooldown => false,
            _ => {
                self.last_fired.insert(metric.to_string(), now);
                true
            }
        }
    }
}

fn evaluate_alerts(engine: &Engine, config: &BatchConfig, sample: &MonitorSample, gate: &mut AlertGate) {
    if sample.database_bytes >= config.db_critical_bytes {
        if gate.allow("db_size_critical") {
            tracing::error!(bytes = sample.database_bytes, "database size critical");
        }
    } else if sample.database_bytes >= config.db_warning_bytes && gate.allow("db_size_warning") {
        tracing::warn!(bytes = sample.database_bytes, "database size above warning level");
    }

    if sample.latency.samples > 0
        && sample.latency.p95 >= config.latency_warning_ms
        && gate.allow("latency_p95")
    {
        tracing::warn!(p95 = sample.latency.p95, "query latency p95 above warning level");
    }

    for (severity, count) in engine.metrics().errors.breached_severities(sample.at) {
        let metric = format!("errors_{severity:?}");
        if gate.allow(&metric) {
            tracing::warn!(?severity, count, "error rate above threshold");
        }
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Handle to the two background jobs
pub struct BatchScheduler {
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BatchScheduler {
    /// Spawn the cleanup and monitoring jobs on the current runtime.
    pub fn start(engine: Arc<Engine>, config: BatchConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);

        let cleanup_handle = {
            let engine = engine.clone();
            let config = config.clone();
            let mut stop_rx = stop_rx.clone();
            tokio::spawn(async move {
                let running = Arc::new(AtomicBool::new(false));
                let mut ticker = tokio::time::interval(config.cleanup_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await; // first tick fires immediately; skip it

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            // Overlap-drop: the flag is cleared by the blocking
                            // task itself, so a run that outlives its deadline
                            // keeps suppressing later ticks until it finishes.
                            if running.swap(true, Ordering::SeqCst) {
                                tracing::debug!("cleanup still running, dropping tick");
                                continue;
                            }
                            let engine = engine.clone();
                            let flag = running.clone();
                            let task = tokio::task::spawn_blocking(move || {
                                let report = engine.run_cleanup();
                                flag.store(false, Ordering::SeqCst);
                                report
                            });
                            match tokio::time::timeout(config.cleanup_deadline, task).await {
                                Ok(Ok(report)) => {
                                    if !report.errors.is_empty() {
                                        tracing::warn!(errors = ?report.errors, "cleanup finished with errors");
                                    }
                                }
                                Ok(Err(e)) => {
                                    tracing::error!("cleanup task panicked: {}", e);
                                    running.store(false, Ordering::SeqCst);
                                }
                                Err(_) => tracing::warn!(
                                    deadline_secs = config.cleanup_deadline.as_secs(),
                                    "cleanup exceeded its deadline; partial results were committed"
                                ),
                            }
                        }
                        changed = stop_rx.changed() => {
                            if changed.is_err() || *stop_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        let monitor_handle = {
            let engine = engine.clone();
            let config = config.clone();
            let mut stop_rx = stop_rx.clone();
            tokio::spawn(async move {
                let mut gate = AlertGate::new(config.alert_cooldown);
                let mut ticker = tokio::time::interval(config.monitor_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let sample = {
                                let engine = engine.clone();
                                match tokio::task::spawn_blocking(move || monitor_sample(engine.as_ref())).await {
                                    Ok(sample) => sample,
                                    Err(e) => {
                                        tracing::error!("monitoring task panicked: {}", e);
                                        continue;
                                    }
                                }
                            };
                            tracing::debug!(
                                items = sample.item_count,
                                db_bytes = sample.database_bytes,
                                p95_ms = sample.latency.p95,
                                "monitoring sample"
                            );
                            evaluate_alerts(engine.as_ref(), &config, &sample, &mut gate);
                        }
                        changed = stop_rx.changed() => {
                            if changed.is_err() || *stop_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        Self {
            stop_tx,
            handles: vec![cleanup_handle, monitor_handle],
        }
    }

    /// Signal both jobs and wait for them to exit. In-flight blocking
    /// work completes its current transaction first.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
