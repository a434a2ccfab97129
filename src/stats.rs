//! Process-wide request counters

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counts request outcomes since startup.
///
/// `total` is derived from the two outcome counters so a snapshot can never
/// report `total != succeeded + failed`.
pub struct RequestCounter {
    succeeded: AtomicU64,
    failed: AtomicU64,
    started: Instant,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub requests_per_minute: f64,
    pub uptime_seconds: f64,
    pub started_at: DateTime<Utc>,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self {
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn record_outcome(&self, success: bool) {
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record every item of a batch as its own outcome
    pub fn record_batch(&self, succeeded: usize, failed: usize) {
        self.succeeded.fetch_add(succeeded as u64, Ordering::Relaxed);
        self.failed.fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RequestStats {
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let total = succeeded + failed;
        let uptime = self.started.elapsed().as_secs_f64();

        RequestStats {
            total_requests: total,
            successful_requests: succeeded,
            failed_requests: failed,
            success_rate: if total == 0 {
                0.0
            } else {
                succeeded as f64 / total as f64
            },
            requests_per_minute: if uptime > 0.0 {
                total as f64 / (uptime / 60.0)
            } else {
                0.0
            },
            uptime_seconds: uptime,
            started_at: self.started_at,
        }
    }
}

impl Default for RequestCounter {
    fn default() -> Self {
        Self::new()
    }
}
