//! Exponential backoff with jitter for HTTP-backed remotes.

use std::time::Duration;

use rand::Rng;

use crate::error::RemoteError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(2);

pub type SleepFn = Box<dyn Fn(Duration) + Send + Sync>;

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Read `ENVSYNC_REMOTE_RETRY_MAX_ATTEMPTS` / `_BASE_DELAY` / `_MAX_DELAY`
    /// with defaults 3 / 200ms / 2s. The cap is floored at the base delay.
    pub fn from_env() -> Self {
        let mut policy = Self::default();
        if let Some(attempts) = env_u32("ENVSYNC_REMOTE_RETRY_MAX_ATTEMPTS") {
            if attempts > 0 {
                policy.max_attempts = attempts;
            }
        }
        if let Some(base) = env_duration("ENVSYNC_REMOTE_RETRY_BASE_DELAY") {
            if !base.is_zero() {
                policy.base_delay = base;
            }
        }
        if let Some(max) = env_duration("ENVSYNC_REMOTE_RETRY_MAX_DELAY") {
            if !max.is_zero() {
                policy.max_delay = max;
            }
        }
        if policy.max_delay < policy.base_delay {
            policy.max_delay = policy.base_delay;
        }
        policy
    }

    /// Backoff before attempt `i + 1` (zero-based failure index):
    /// `base * 2^i` clamped to `max_delay`.
    pub fn backoff(&self, failure_index: u32) -> Duration {
        let factor = 1u32.checked_shl(failure_index).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn env_duration(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    envsync_core::parse_duration(raw.trim())
}

/// Run `op` up to `policy.max_attempts` times. Sleeps `backoff + jitter`
/// between attempts, where jitter is uniform in `[0, backoff/2]`; sleeping
/// goes through `sleep` so tests can observe it.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    sleep: &dyn Fn(Duration),
    mut op: impl FnMut() -> Result<T, RemoteError>,
) -> Result<T, RemoteError> {
    let attempts = policy.max_attempts.max(1);
    let mut failure_index = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || failure_index + 1 >= attempts {
                    return Err(err);
                }
                let backoff = policy.backoff(failure_index);
                let jitter_cap = backoff / 2;
                let jitter = if jitter_cap.is_zero() {
                    Duration::ZERO
                } else {
                    let nanos = rand::rng().random_range(0..=jitter_cap.as_nanos() as u64);
                    Duration::from_nanos(nanos)
                };
                sleep(backoff + jitter);
                failure_index += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    fn transient() -> RemoteError {
        RemoteError::Network {
            message: "connection reset".into(),
            retryable: true,
        }
    }

    #[test]
    fn backoff_doubles_and_clamps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(200));
        assert_eq!(policy.backoff(1), Duration::from_millis(400));
        assert_eq!(policy.backoff(2), Duration::from_millis(800));
        assert_eq!(policy.backoff(3), Duration::from_millis(1600));
        assert_eq!(policy.backoff(4), Duration::from_secs(2));
        assert_eq!(policy.backoff(20), Duration::from_secs(2));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            max_attempts: 4,
            ..Default::default()
        };
        let slept = RefCell::new(Vec::new());
        let mut calls = 0;
        let result = with_retry(
            &policy,
            &|d| slept.borrow_mut().push(d),
            || {
                calls += 1;
                if calls < 3 {
                    Err(transient())
                } else {
                    Ok(calls)
                }
            },
        );
        assert_eq!(result.unwrap(), 3);

        // Two failures, two sleeps, each within [backoff, backoff * 1.5].
        let slept = slept.borrow();
        assert_eq!(slept.len(), 2);
        for (i, d) in slept.iter().enumerate() {
            let base = policy.backoff(i as u32);
            assert!(*d >= base, "sleep {d:?} below backoff {base:?}");
            assert!(*d <= base + base / 2, "sleep {d:?} above jitter cap");
        }
        assert!(slept[0] <= slept[1] + slept[1] / 2);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        let mut calls = 0;
        let result: Result<(), _> = with_retry(&policy, &|_| {}, || {
            calls += 1;
            Err(transient())
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn fatal_errors_do_not_retry() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let result: Result<(), _> = with_retry(&policy, &|_| {}, || {
            calls += 1;
            Err(RemoteError::HttpStatus {
                op: "PUT",
                status: 404,
                message: "not found".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn http_429_and_5xx_retry() {
        for status in [429u16, 500, 503] {
            let policy = RetryPolicy {
                max_attempts: 2,
                ..Default::default()
            };
            let mut calls = 0;
            let _: Result<(), _> = with_retry(&policy, &|_| {}, || {
                calls += 1;
                Err(RemoteError::HttpStatus {
                    op: "GET",
                    status,
                    message: String::new(),
                })
            });
            assert_eq!(calls, 2, "status {status} should retry");
        }
    }
}
