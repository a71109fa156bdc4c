//! Per-provider upstream health tracking

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Provider;

/// Consecutive failures before a provider is reported unhealthy
const UNHEALTHY_AFTER: u64 = 3;
/// Latency samples kept per provider
const LATENCY_SAMPLES: usize = 128;

/// Success / failure / latency counters of one provider
pub struct HealthTracker {
    provider: Provider,
    healthy: AtomicBool,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    consecutive_failures: AtomicU64,
    last_success: AtomicU64,
    last_failure: AtomicU64,
    last_error: RwLock<Option<String>>,
    latencies: RwLock<LatencyWindow>,
}

impl HealthTracker {
    /// Create a tracker for `provider`
    #[must_use]
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            healthy: AtomicBool::new(true),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            last_success: AtomicU64::new(0),
            last_failure: AtomicU64::new(0),
            last_error: RwLock::new(None),
            latencies: RwLock::new(LatencyWindow::new(LATENCY_SAMPLES)),
        }
    }

    /// Record a successful call
    pub fn record_success(&self, latency: Duration) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.last_success.store(now_millis(), Ordering::Relaxed);
        self.latencies.write().record(latency);

        if !self.healthy.swap(true, Ordering::Relaxed) {
            info!(provider = %self.provider, "Upstream recovered");
        }
    }

    /// Record a failed call
    pub fn record_failure(&self, reason: &str) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        let consecutive = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_failure.store(now_millis(), Ordering::Relaxed);
        *self.last_error.write() = Some(reason.to_string());

        if consecutive >= UNHEALTHY_AFTER && self.healthy.swap(false, Ordering::Relaxed) {
            warn!(
                provider = %self.provider,
                consecutive_failures = consecutive,
                "Upstream marked unhealthy"
            );
        } else {
            debug!(provider = %self.provider, consecutive_failures = consecutive, "Upstream call failed");
        }
    }

    /// Whether the provider is currently considered healthy
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of the counters
    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        let latencies = self.latencies.read();
        HealthSnapshot {
            provider: self.provider,
            healthy: self.is_healthy(),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_success_ms: self.last_success.load(Ordering::Relaxed),
            last_failure_ms: self.last_failure.load(Ordering::Relaxed),
            last_error: self.last_error.read().clone(),
            latency_p50_ms: latencies.percentile(0.50),
            latency_p95_ms: latencies.percentile(0.95),
        }
    }
}

/// Health counters of one provider, as reported by `/health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    /// Provider name
    pub provider: Provider,
    /// Fewer than three consecutive failures
    pub healthy: bool,
    /// Total successful calls
    pub success_count: u64,
    /// Total failed calls
    pub failure_count: u64,
    /// Failures since the last success
    pub consecutive_failures: u64,
    /// Last success (millis since epoch, 0 = never)
    pub last_success_ms: u64,
    /// Last failure (millis since epoch, 0 = never)
    pub last_failure_ms: u64,
    /// Reason of the most recent failure
    pub last_error: Option<String>,
    /// Median latency of recent successful calls
    pub latency_p50_ms: Option<u64>,
    /// 95th percentile latency of recent successful calls
    pub latency_p95_ms: Option<u64>,
}

/// Trackers for every provider
pub struct UpstreamHealth {
    trackers: [HealthTracker; 3],
}

impl UpstreamHealth {
    /// Fresh counters for all providers
    #[must_use]
    pub fn new() -> Self {
        Self {
            trackers: Provider::ALL.map(HealthTracker::new),
        }
    }

    /// Tracker of one provider
    #[must_use]
    pub fn tracker(&self, provider: Provider) -> &HealthTracker {
        match provider {
            Provider::Metadata => &self.trackers[0],
            Provider::DefiLlama => &self.trackers[1],
            Provider::CoinGecko => &self.trackers[2],
        }
    }

    /// Snapshots in `Provider::ALL` order
    #[must_use]
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        self.trackers.iter().map(HealthTracker::snapshot).collect()
    }

    /// True when every provider is healthy
    #[must_use]
    pub fn all_healthy(&self) -> bool {
        self.trackers.iter().all(HealthTracker::is_healthy)
    }
}

impl Default for UpstreamHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Sliding window of recent latencies (milliseconds)
struct LatencyWindow {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl LatencyWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn record(&mut self, latency: Duration) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples
            .push_back(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX));
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn percentile(&self, p: f64) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64) * p).floor() as usize;
        sorted.get(index.min(sorted.len() - 1)).copied()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_resets_consecutive_failures() {
        let tracker = HealthTracker::new(Provider::DefiLlama);
        tracker.record_failure("timeout");
        tracker.record_failure("timeout");
        tracker.record_success(Duration::from_millis(40));

        let snap = tracker.snapshot();
        assert!(snap.healthy);
        assert_eq!(snap.success_count, 1);
        assert_eq!(snap.failure_count, 2);
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.last_error.as_deref(), Some("timeout"));
        assert_eq!(snap.latency_p50_ms, Some(40));
    }

    #[test]
    fn test_unhealthy_after_three_failures() {
        let tracker = HealthTracker::new(Provider::CoinGecko);
        tracker.record_failure("429");
        tracker.record_failure("429");
        assert!(tracker.is_healthy());
        tracker.record_failure("429");
        assert!(!tracker.is_healthy());

        tracker.record_success(Duration::from_millis(5));
        assert!(tracker.is_healthy());
    }

    #[test]
    fn test_latency_window_capacity() {
        let mut window = LatencyWindow::new(5);
        for i in 1..=10 {
            window.record(Duration::from_millis(i * 10));
        }
        assert_eq!(window.samples.len(), 5);
        assert_eq!(window.percentile(0.0), Some(60));
        assert_eq!(window.percentile(0.99), Some(100));
    }

    #[test]
    fn test_upstream_health_order() {
        let health = UpstreamHealth::new();
        health.tracker(Provider::Metadata).record_failure("boom");

        let snaps = health.snapshot();
        let providers: Vec<_> = snaps.iter().map(|s| s.provider).collect();
        assert_eq!(providers, Provider::ALL.to_vec());
        assert_eq!(snaps[0].failure_count, 1);
        assert!(health.all_healthy());
    }
}
