//! HTTP remote speaking the `/v1/store` contract.
//!
//! `GET /v1/store` returns the store; `PUT /v1/store` carries an `If-Match`
//! header naming the revision the client read and a body whose revision is
//! already bumped. Both sides of the contract are shared by the self-hosted
//! server and the cloud service.

use std::time::Duration;

use envsync_core::RemoteStore;
use serde_json::Value;

use crate::error::RemoteError;
use crate::retry::{with_retry, RetryPolicy, SleepFn};
use crate::RemoteTransport;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpRemote {
    base_url: String,
    token: Option<String>,
    client: reqwest::blocking::Client,
    retry: RetryPolicy,
    sleep: SleepFn,
}

impl HttpRemote {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, RemoteError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Network {
                message: e.to_string(),
                retryable: false,
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            client,
            retry: RetryPolicy::from_env(),
            sleep: Box::new(std::thread::sleep),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleep(mut self, sleep: SleepFn) -> Self {
        self.sleep = sleep;
        self
    }

    fn store_url(&self) -> String {
        format!("{}/v1/store", self.base_url)
    }

    fn authorize(
        &self,
        req: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

fn classify(err: reqwest::Error) -> RemoteError {
    let retryable = err.is_timeout() || err.is_connect();
    RemoteError::Network {
        message: err.to_string(),
        retryable,
    }
}

fn status_error(op: &'static str, resp: reqwest::blocking::Response) -> RemoteError {
    let status = resp.status().as_u16();
    let message = resp
        .text()
        .map(|body| body.chars().take(1024).collect::<String>())
        .map(|body| body.trim().to_string())
        .unwrap_or_default();
    RemoteError::HttpStatus {
        op,
        status,
        message,
    }
}

impl RemoteTransport for HttpRemote {
    fn load(&self) -> Result<RemoteStore, RemoteError> {
        with_retry(&self.retry, self.sleep.as_ref(), || {
            let resp = self
                .authorize(self.client.get(self.store_url()))
                .send()
                .map_err(classify)?;
            if !resp.status().is_success() {
                return Err(status_error("GET", resp));
            }
            let store: RemoteStore = resp.json().map_err(|e| RemoteError::Network {
                message: e.to_string(),
                retryable: false,
            })?;
            Ok(store)
        })
    }

    fn save(&self, store: &RemoteStore, expected_revision: i64) -> Result<(), RemoteError> {
        let mut body = store.clone();
        body.revision = expected_revision + 1;
        with_retry(&self.retry, self.sleep.as_ref(), || {
            let resp = self
                .authorize(self.client.put(self.store_url()))
                .header("If-Match", expected_revision.to_string())
                .json(&body)
                .send()
                .map_err(classify)?;
            if !resp.status().is_success() {
                return Err(status_error("PUT", resp));
            }
            Ok(())
        })
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}

/// `GET /v1/me` with a bearer token; returns the `user` object when present,
/// else the whole payload. Used by `login` and `whoami`.
pub fn cloud_me(base_url: &str, token: &str) -> Result<Value, RemoteError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| RemoteError::Network {
            message: e.to_string(),
            retryable: false,
        })?;
    let url = format!("{}/v1/me", base_url.trim_end_matches('/'));
    let resp = client.get(url).bearer_auth(token).send().map_err(classify)?;
    if !resp.status().is_success() {
        return Err(status_error("GET /v1/me", resp));
    }
    let payload: Value = resp.json().map_err(|e| RemoteError::Network {
        message: e.to_string(),
        retryable: false,
    })?;
    match payload.get("user") {
        Some(user) if user.is_object() => Ok(user.clone()),
        _ => Ok(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let remote = HttpRemote::new("http://localhost:8080/", None).unwrap();
        assert_eq!(remote.store_url(), "http://localhost:8080/v1/store");
        assert_eq!(remote.describe(), "http://localhost:8080");
    }

    #[test]
    fn connection_refused_is_retried_then_surfaced() {
        // Port 1 is never listening; every attempt fails with a connect error.
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let slept = std::sync::Arc::new(std::sync::Mutex::new(0u32));
        let observed = slept.clone();
        let remote = HttpRemote::new("http://127.0.0.1:1", None)
            .unwrap()
            .with_retry_policy(policy)
            .with_sleep(Box::new(move |_| {
                *observed.lock().unwrap() += 1;
            }));

        let err = remote.load().unwrap_err();
        assert!(matches!(err, RemoteError::Network { .. }));
        assert_eq!(*slept.lock().unwrap(), 1, "one sleep between two attempts");
    }
}
