//! Fixed 60-second window rate limiter keyed by client IP.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct WindowState {
    window_start: Instant,
    count: u32,
}

pub struct RateLimiter {
    rpm: u32,
    burst: u32,
    clients: Mutex<HashMap<String, WindowState>>,
}

impl RateLimiter {
    pub fn new(rpm: u32, burst: u32) -> Self {
        Self {
            rpm,
            burst,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.rpm > 0
    }

    /// Capacity per window is `rpm + burst`.
    pub fn allow(&self, ip: &str, now: Instant) -> bool {
        if !self.enabled() {
            return true;
        }
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let state = clients.entry(ip.to_string()).or_insert(WindowState {
            window_start: now,
            count: 0,
        });
        if now.saturating_duration_since(state.window_start) >= Duration::from_secs(60) {
            state.window_start = now;
            state.count = 1;
            return true;
        }
        if state.count >= self.rpm + self.burst {
            return false;
        }
        state.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_rpm_plus_burst() {
        let limiter = RateLimiter::new(3, 2);
        let now = Instant::now();
        for _ in 0..5 {
            assert!(limiter.allow("ip", now));
        }
        assert!(!limiter.allow("ip", now));
    }

    #[test]
    fn window_resets_after_a_minute() {
        let limiter = RateLimiter::new(1, 0);
        let start = Instant::now();
        assert!(limiter.allow("ip", start));
        assert!(!limiter.allow("ip", start));
        assert!(limiter.allow("ip", start + Duration::from_secs(61)));
        assert!(!limiter.allow("ip", start + Duration::from_secs(61)));
    }

    #[test]
    fn clients_are_independent() {
        let limiter = RateLimiter::new(1, 0);
        let now = Instant::now();
        assert!(limiter.allow("a", now));
        assert!(!limiter.allow("a", now));
        assert!(limiter.allow("b", now));
    }

    #[test]
    fn zero_rpm_disables() {
        let limiter = RateLimiter::new(0, 10);
        let now = Instant::now();
        for _ in 0..100 {
            assert!(limiter.allow("ip", now));
        }
    }
}
