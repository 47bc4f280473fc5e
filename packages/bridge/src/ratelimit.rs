use dashmap::DashMap;
use std::time::{Duration, Instant};

struct Bucket {
    window_start: Instant,
    count: u32,
}

/// Fixed-window limiter for per-submission `test-case` broadcasts.
///
/// A judge streaming hundreds of case results must not turn into hundreds
/// of UI broadcasts; the store still records every case, only the
/// notification fan-out is limited.
pub struct UpdateRateLimiter {
    max_updates: u32,
    window: Duration,
    buckets: DashMap<i64, Bucket>,
}

impl UpdateRateLimiter {
    pub fn new(max_updates: u32, window: Duration) -> Self {
        Self {
            max_updates,
            window,
            buckets: DashMap::new(),
        }
    }

    /// Whether a broadcast for this submission is allowed right now.
    pub fn allow(&self, submission_id: i64) -> bool {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(submission_id).or_insert_with(|| Bucket {
            window_start: now,
            count: 0,
        });
        if now.duration_since(bucket.window_start) >= self.window {
            bucket.window_start = now;
            bucket.count = 0;
        }
        if bucket.count < self.max_updates {
            bucket.count += 1;
            true
        } else {
            false
        }
    }

    /// Drop a submission's bucket once its grading attempt ends.
    pub fn forget(&self, submission_id: i64) {
        self.buckets.remove(&submission_id);
    }
}
