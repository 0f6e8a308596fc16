//! Fixed request counters rendered in Prometheus text format.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct ServerMetrics {
    requests_total: AtomicU64,
    requests_2xx: AtomicU64,
    requests_4xx: AtomicU64,
    requests_5xx: AtomicU64,
    rate_limited_total: AtomicU64,
    unauthorized_total: AtomicU64,
}

impl ServerMetrics {
    pub fn record_status(&self, status: u16) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        match status {
            200..=299 => self.requests_2xx.fetch_add(1, Ordering::Relaxed),
            400..=499 => self.requests_4xx.fetch_add(1, Ordering::Relaxed),
            500..=599 => self.requests_5xx.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unauthorized(&self) {
        self.unauthorized_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render(&self) -> String {
        format!(
            "envsync_requests_total {}\n\
             envsync_requests_2xx_total {}\n\
             envsync_requests_4xx_total {}\n\
             envsync_requests_5xx_total {}\n\
             envsync_rate_limited_total {}\n\
             envsync_unauthorized_total {}\n",
            self.requests_total.load(Ordering::Relaxed),
            self.requests_2xx.load(Ordering::Relaxed),
            self.requests_4xx.load(Ordering::Relaxed),
            self.requests_5xx.load(Ordering::Relaxed),
            self.rate_limited_total.load(Ordering::Relaxed),
            self.unauthorized_total.load(Ordering::Relaxed),
        )
    }
}
