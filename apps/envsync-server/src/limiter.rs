//! Per-IP token bucket rate limiter.
//!
//! Buckets refill at `rpm/60` tokens per second up to `max(1, burst)`.
//! A periodic sweep drops buckets idle longer than `(capacity/rate)*2`
//! seconds so the map stays bounded.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    last: Instant,
}

pub struct RateLimiter {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(rpm: u32, burst: u32) -> Self {
        let rate_per_sec = if rpm > 0 { f64::from(rpm) / 60.0 } else { 0.0 };
        Self {
            rate_per_sec,
            capacity: f64::from(burst.max(1)),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.rate_per_sec > 0.0
    }

    pub fn allow(&self, key: &str, now: Instant) -> bool {
        if !self.enabled() {
            return true;
        }
        let key = if key.is_empty() { "unknown" } else { key };
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last: now,
        });
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            bucket.last = now;
        }
        if bucket.tokens < 1.0 {
            return false;
        }
        bucket.tokens -= 1.0;
        true
    }

    /// Seconds of inactivity after which a bucket is evicted.
    pub fn idle_eviction_secs(&self) -> f64 {
        if self.rate_per_sec <= 0.0 {
            return f64::INFINITY;
        }
        (self.capacity / self.rate_per_sec) * 2.0
    }

    /// Drop buckets idle past the eviction window.
    pub fn sweep(&self, now: Instant) {
        if !self.enabled() {
            return;
        }
        let idle_limit = self.idle_eviction_secs();
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        buckets.retain(|_, bucket| {
            now.saturating_duration_since(bucket.last).as_secs_f64() <= idle_limit
        });
    }

    pub fn tracked(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn burst_is_consumed_then_blocked() {
        let limiter = RateLimiter::new(60, 3);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.allow("1.2.3.4", now));
        }
        assert!(!limiter.allow("1.2.3.4", now));
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = RateLimiter::new(60, 1); // 1 token/sec
        let start = Instant::now();
        assert!(limiter.allow("ip", start));
        assert!(!limiter.allow("ip", start));
        assert!(limiter.allow("ip", start + Duration::from_secs(2)));
    }

    #[test]
    fn capacity_is_clamped() {
        let limiter = RateLimiter::new(60, 2);
        let start = Instant::now();
        // A long idle period must not accumulate past capacity.
        assert!(limiter.allow("ip", start));
        let later = start + Duration::from_secs(3600);
        assert!(limiter.allow("ip", later));
        assert!(limiter.allow("ip", later));
        assert!(!limiter.allow("ip", later));
    }

    #[test]
    fn ips_are_independent() {
        let limiter = RateLimiter::new(60, 1);
        let now = Instant::now();
        assert!(limiter.allow("a", now));
        assert!(!limiter.allow("a", now));
        assert!(limiter.allow("b", now));
    }

    #[test]
    fn zero_rpm_disables_limiting() {
        let limiter = RateLimiter::new(0, 5);
        let now = Instant::now();
        for _ in 0..1000 {
            assert!(limiter.allow("ip", now));
        }
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn sweep_evicts_idle_buckets() {
        let limiter = RateLimiter::new(60, 10);
        let start = Instant::now();
        limiter.allow("a", start);
        limiter.allow("b", start);
        assert_eq!(limiter.tracked(), 2);

        // Idle window is (10 / 1) * 2 = 20s.
        limiter.sweep(start + Duration::from_secs(21));
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn sweep_keeps_active_buckets() {
        let limiter = RateLimiter::new(60, 10);
        let start = Instant::now();
        limiter.allow("a", start);
        limiter.sweep(start + Duration::from_secs(5));
        assert_eq!(limiter.tracked(), 1);
    }
}
