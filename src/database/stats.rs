//! Statistics
//!
//! Lock-free operation counters shared by a provider and the transactions
//! it hands out, plus the point-in-time [`DatabaseStats`] and
//! [`HealthStatus`] snapshots.

use crate::logging::{log_warn, Logger};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Outcome of recording one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recorded {
    /// The operation exceeded the slow threshold
    pub slow: bool,
}

/// Cumulative operation counters
///
/// Counters only grow. Reconnecting does not reset them.
#[derive(Debug)]
pub struct StatsTracker {
    total_queries: AtomicU64,
    slow_queries: AtomicU64,
    failed_queries: AtomicU64,
    total_latency_us: AtomicU64,
    slow_threshold_us: AtomicU64,
    last_backup: Mutex<Option<DateTime<Utc>>>,
}

impl StatsTracker {
    /// Tracker with the given slow threshold
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            total_queries: AtomicU64::new(0),
            slow_queries: AtomicU64::new(0),
            failed_queries: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            slow_threshold_us: AtomicU64::new(duration_us(slow_threshold)),
            last_backup: Mutex::new(None),
        }
    }

    /// Change the slow threshold (applied on connect)
    pub fn set_slow_threshold(&self, threshold: Duration) {
        self.slow_threshold_us
            .store(duration_us(threshold), Ordering::Relaxed);
    }

    /// Current slow threshold
    pub fn slow_threshold(&self) -> Duration {
        Duration::from_micros(self.slow_threshold_us.load(Ordering::Relaxed))
    }

    /// Record one completed operation
    pub fn record(&self, elapsed: Duration, succeeded: bool) -> Recorded {
        let elapsed_us = duration_us(elapsed);
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(elapsed_us, Ordering::Relaxed);

        if !succeeded {
            self.failed_queries.fetch_add(1, Ordering::Relaxed);
        }

        let threshold = self.slow_threshold_us.load(Ordering::Relaxed);
        let slow = threshold > 0 && elapsed_us > threshold;
        if slow {
            self.slow_queries.fetch_add(1, Ordering::Relaxed);
        }
        Recorded { slow }
    }

    /// Record an operation and log it at warn if it was slow
    pub fn observe(&self, logger: &Logger, operation: &str, elapsed: Duration, succeeded: bool) {
        if self.record(elapsed, succeeded).slow {
            log_warn!(
                logger,
                operation = %operation,
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.slow_threshold().as_millis() as u64,
                "slow database operation"
            );
        }
    }

    /// Remember the completion time of a successful backup
    pub fn mark_backup(&self, at: DateTime<Utc>) {
        *self.last_backup.lock() = Some(at);
    }

    /// Last successful backup
    pub fn last_backup(&self) -> Option<DateTime<Utc>> {
        *self.last_backup.lock()
    }

    /// Fill the counter fields of a stats snapshot
    pub fn snapshot_into(&self, stats: &mut DatabaseStats) {
        let total = self.total_queries.load(Ordering::Relaxed);
        let latency = self.total_latency_us.load(Ordering::Relaxed);

        stats.total_queries = total;
        stats.slow_queries = self.slow_queries.load(Ordering::Relaxed);
        stats.failed_queries = self.failed_queries.load(Ordering::Relaxed);
        stats.average_latency = if total == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(latency / total)
        };
        stats.last_backup = self.last_backup();
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::config::DEFAULT_SLOW_THRESHOLD_MS))
    }
}

fn duration_us(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// Point-in-time provider statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseStats {
    /// Open connections (idle and in use)
    pub open_connections: u32,
    /// Connections checked out
    pub in_use: u32,
    /// Idle connections
    pub idle: u32,
    /// Completed operations
    pub total_queries: u64,
    /// Operations over the slow threshold
    pub slow_queries: u64,
    /// Failed operations
    pub failed_queries: u64,
    /// Accumulated latency divided by total operations
    #[serde(with = "duration_millis")]
    pub average_latency: Duration,
    /// Storage used by the dataset in bytes, where the backend reports it
    pub total_size: Option<u64>,
    /// Completion time of the last successful backup
    pub last_backup: Option<DateTime<Utc>>,
    /// Provider name
    pub provider: String,
    /// Backend version
    pub version: String,
    /// Free-form details
    pub metadata: BTreeMap<String, String>,
}

/// Health check result, computed fresh on every call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Liveness check succeeded
    pub healthy: bool,
    /// Time taken by the check
    #[serde(with = "duration_millis")]
    pub response_time: Duration,
    /// Failure reason (sanitized)
    pub error: Option<String>,
    /// Free-form details
    pub details: BTreeMap<String, String>,
    /// When the check ran
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    /// Unhealthy status with a reason
    pub fn unhealthy(error: impl Into<String>, response_time: Duration) -> Self {
        Self {
            healthy: false,
            response_time,
            error: Some(error.into()),
            details: BTreeMap::new(),
            checked_at: Utc::now(),
        }
    }

    /// Healthy status
    pub fn healthy(response_time: Duration) -> Self {
        Self {
            healthy: true,
            response_time,
            error: None,
            details: BTreeMap::new(),
            checked_at: Utc::now(),
        }
    }
}

mod duration_millis {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = f64::deserialize(d)?;
        Duration::try_from_secs_f64(millis.max(0.0) / 1000.0).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_average_latency_guards_division() {
        let tracker = StatsTracker::new(Duration::from_millis(100));
        let mut stats = DatabaseStats::default();
        tracker.snapshot_into(&mut stats);
        assert_eq!(stats.total_queries, 0);
        assert_eq!(stats.average_latency, Duration::ZERO);
    }

    #[test]
    fn test_counts_slow_and_failed() {
        let tracker = StatsTracker::new(Duration::from_millis(100));
        tracker.record(Duration::from_millis(10), true);
        assert!(tracker.record(Duration::from_millis(150), true).slow);
        tracker.record(Duration::from_millis(20), false);

        let mut stats = DatabaseStats::default();
        tracker.snapshot_into(&mut stats);
        assert_eq!(stats.total_queries, 3);
        assert_eq!(stats.slow_queries, 1);
        assert_eq!(stats.failed_queries, 1);
        assert_eq!(stats.average_latency, Duration::from_millis(60));
    }

    #[test]
    fn test_concurrent_records() {
        let tracker = Arc::new(StatsTracker::new(Duration::from_secs(1)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        tracker.record(Duration::from_micros(5), true);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut stats = DatabaseStats::default();
        tracker.snapshot_into(&mut stats);
        assert_eq!(stats.total_queries, 8000);
        assert_eq!(stats.average_latency, Duration::from_micros(5));
    }

    #[test]
    fn test_last_backup() {
        let tracker = StatsTracker::default();
        assert!(tracker.last_backup().is_none());
        let now = Utc::now();
        tracker.mark_backup(now);
        assert_eq!(tracker.last_backup(), Some(now));
    }

    #[test]
    fn test_latency_round_trips_and_rejects_overflow() {
        let mut stats = DatabaseStats::default();
        stats.average_latency = Duration::from_millis(500);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["average_latency"], 500.0);
        let back: DatabaseStats = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back.average_latency, Duration::from_millis(500));

        let mut huge = json;
        huge["average_latency"] = serde_json::json!(1e300);
        assert!(serde_json::from_value::<DatabaseStats>(huge).is_err());
    }
}
