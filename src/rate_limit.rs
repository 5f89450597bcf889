//! Per-provider request budget.
//!
//! A plain token bucket: capacity = requests-per-minute, continuous refill.
//! The cascade calls `try_acquire` before each LLM invocation; an empty
//! bucket behaves exactly like a provider timeout (advance to the next
//! provider), so the budget never blocks the pipeline.

use std::sync::Mutex;
use std::time::Instant;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn per_minute(requests: u32) -> Self {
        let capacity = requests.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if available. Never blocks.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_starts_full() {
        let bucket = TokenBucket::per_minute(3);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn test_bucket_refills_over_time() {
        let bucket = TokenBucket::per_minute(60); // one per second
        while bucket.try_acquire() {}
        assert!(!bucket.try_acquire());
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(bucket.try_acquire());
    }

    #[test]
    fn test_zero_rpm_is_clamped_to_one() {
        let bucket = TokenBucket::per_minute(0);
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }
}
