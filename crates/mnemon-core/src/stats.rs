//! Statistics and Error Recording
//!
//! Advisory, in-memory registries shared by the search path, the
//! dispatcher, and the monitoring job:
//!
//! - per-query search buckets (text/vector hit counts)
//! - a sliding window of recent query latencies with percentiles
//! - a bounded ring buffer of classified errors with windowed alerting
//!
//! Last-write-wins on racy updates is tolerated; values are advisory.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

// ============================================================================
// SEARCH STATS
// ============================================================================

/// Per-normalized-query statistics bucket
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStats {
    pub text_hits: u64,
    pub vector_hits: u64,
    pub total: u64,
}

/// Registry of search buckets keyed by normalized query
#[derive(Default)]
pub struct SearchStatsRegistry {
    buckets: Mutex<HashMap<String, QueryStats>>,
}

impl SearchStatsRegistry {
    pub fn record(&self, normalized_query: &str, text_hits: usize, vector_hits: usize) {
        if let Ok(mut buckets) = self.buckets.lock() {
            let bucket = buckets.entry(normalized_query.to_string()).or_default();
            bucket.text_hits += text_hits as u64;
            bucket.vector_hits += vector_hits as u64;
            bucket.total += 1;
        }
    }

    pub fn snapshot(&self) -> HashMap<String, QueryStats> {
        self.buckets.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

// ============================================================================
// LATENCY
// ============================================================================

const LATENCY_WINDOW: usize = 512;

/// Latency percentile summary in milliseconds
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub samples: usize,
}

/// Sliding window of recent query latencies
#[derive(Default)]
pub struct LatencyTracker {
    samples: Mutex<VecDeque<f64>>,
}

impl LatencyTracker {
    pub fn record_ms(&self, millis: f64) {
        if let Ok(mut samples) = self.samples.lock() {
            if samples.len() >= LATENCY_WINDOW {
                samples.pop_front();
            }
            samples.push_back(millis);
        }
    }

    pub fn percentiles(&self) -> LatencyPercentiles {
        let Ok(samples) = self.samples.lock() else {
            return LatencyPercentiles::default();
        };
        if samples.is_empty() {
            return LatencyPercentiles::default();
        }
        let mut sorted: Vec<f64> = samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let pick = |q: f64| {
            let idx = ((sorted.len() as f64 - 1.0) * q).round() as usize;
            sorted[idx.min(sorted.len() - 1)]
        };
        LatencyPercentiles {
            p50: pick(0.50),
            p95: pick(0.95),
            p99: pick(0.99),
            samples: sorted.len(),
        }
    }
}

// ============================================================================
// ERROR LOG
// ============================================================================

/// Error severity for alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Error category for triage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Database,
    Network,
    Validation,
    Search,
    Embedding,
    Cache,
    Other,
}

/// One classified error
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub code: String,
    pub message: String,
    pub severity: ErrorSeverity,
    pub category: ErrorCategory,
    /// Tool name when the error crossed the dispatcher boundary
    pub tool: Option<String>,
}

/// Default ring capacity
pub const ERROR_RING_CAPACITY: usize = 256;

/// Alert window
const ALERT_WINDOW_MINUTES: i64 = 60;

/// Per-severity alert thresholds over the window
fn alert_threshold(severity: ErrorSeverity) -> usize {
    match severity {
        ErrorSeverity::Low => 100,
        ErrorSeverity::Medium => 50,
        ErrorSeverity::High => 10,
        ErrorSeverity::Critical => 1,
    }
}

/// Bounded ring buffer of classified errors
pub struct ErrorLog {
    ring: Mutex<VecDeque<ErrorRecord>>,
    capacity: usize,
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new(ERROR_RING_CAPACITY)
    }
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, record: ErrorRecord) {
        if let Ok(mut ring) = self.ring.lock() {
            if ring.len() >= self.capacity {
                ring.pop_front();
            }
            ring.push_back(record);
        }
    }

    /// Most recent errors, newest last
    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.ring
            .lock()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Error counts per severity inside the alert window
    pub fn counts_in_window(&self, now: DateTime<Utc>) -> HashMap<ErrorSeverity, usize> {
        let cutoff = now - Duration::minutes(ALERT_WINDOW_MINUTES);
        let mut counts = HashMap::new();
        if let Ok(ring) = self.ring.lock() {
            for record in ring.iter().filter(|r| r.at >= cutoff) {
                *counts.entry(record.severity).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Severities whose windowed counts exceed their thresholds
    pub fn breached_severities(&self, now: DateTime<Utc>) -> Vec<(ErrorSeverity, usize)> {
        self.counts_in_window(now)
            .into_iter()
            .filter(|(severity, count)| *count >= alert_threshold(*severity))
            .collect()
    }
}

// ============================================================================
// METRICS REGISTRY
// ============================================================================

/// Shared registry bundling the advisory stores. Cloning shares the
/// underlying state.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    pub search: std::sync::Arc<SearchStatsRegistry>,
    pub latency: std::sync::Arc<LatencyTracker>,
    pub errors: std::sync::Arc<ErrorLog>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_buckets_accumulate() {
        let registry = SearchStatsRegistry::default();
        registry.record("api", 3, 5);
        registry.record("api", 1, 0);
        registry.record("other", 0, 0);

        let snapshot = registry.snapshot();
        let api = snapshot.get("api").unwrap();
        assert_eq!(api.total, 2);
        assert_eq!(api.text_hits, 4);
        assert_eq!(api.vector_hits, 5);
        assert_eq!(snapshot.get("other").unwrap().total, 1);
    }

    #[test]
    fn test_latency_percentiles() {
        let tracker = LatencyTracker::default();
        for ms in 1..=100 {
            tracker.record_ms(ms as f64);
        }
        let p = tracker.percentiles();
        assert_eq!(p.samples, 100);
        assert!((p.p50 - 50.0).abs() <= 1.0);
        assert!(p.p95 >= 94.0 && p.p95 <= 96.0);
        assert!(p.p99 >= 98.0);
    }

    #[test]
    fn test_latency_empty() {
        let tracker = LatencyTracker::default();
        assert_eq!(tracker.percentiles().samples, 0);
    }

    #[test]
    fn test_error_ring_is_bounded() {
        let log = ErrorLog::new(3);
        for i in 0..5 {
            log.record(ErrorRecord {
                at: Utc::now(),
                code: "busy".into(),
                message: format!("error {i}"),
                severity: ErrorSeverity::Low,
                category: ErrorCategory::Database,
                tool: None,
            });
        }
        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 3);
        // Oldest entries were dropped
        assert_eq!(snapshot[0].message, "error 2");
    }

    #[test]
    fn test_alert_thresholds() {
        let log = ErrorLog::default();
        let now = Utc::now();
        log.record(ErrorRecord {
            at: now,
            code: "fatal".into(),
            message: "corruption".into(),
            severity: ErrorSeverity::Critical,
            category: ErrorCategory::Database,
            tool: None,
        });

        let breached = log.breached_severities(now);
        assert!(breached.iter().any(|(s, _)| *s == ErrorSeverity::Critical));

        // A single low-severity error never alerts
        let log = ErrorLog::default();
        log.record(ErrorRecord {
            at: now,
            code: "busy".into(),
            message: "lock".into(),
            severity: ErrorSeverity::Low,
            category: ErrorCategory::Database,
            tool: None,
        });
        assert!(log.breached_severities(now).is_empty());
    }

    #[test]
    fn test_window_excludes_old_errors() {
        let log = ErrorLog::default();
        let now = Utc::now();
        log.record(ErrorRecord {
            at: now - Duration::minutes(120),
            code: "fatal".into(),
            message: "old".into(),
            severity: ErrorSeverity::Critical,
            category: ErrorCategory::Database,
            tool: None,
        });
        assert!(log.breached_severities(now).is_empty());
    }
}
