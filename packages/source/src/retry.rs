//! HTTP retry helpers for transient errors.
//!
//! Every request to the upstream API goes through [`send_json`], which
//! applies a [`RetryPolicy`]: a fixed number of retries separated by a
//! fixed delay. Non-transient failures (see [`SourceError::is_transient`])
//! are returned immediately.
//!
//! # Usage
//!
//! ```ignore
//! use crate::retry::{self, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let body = retry::send_json(&policy, || client.get(&url).query(&params)).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use crate::SourceError;

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 500;

/// How many times to retry a failed request and how long to wait between
/// attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts is `max_retries + 1`.
    pub max_retries: u32,
    /// Fixed delay before each retry.
    #[serde(rename = "delay_secs", with = "duration_secs")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    /// Total number of attempts this policy allows.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Runs `op` until it succeeds, fails permanently, or the policy is
/// exhausted.
///
/// `op` is called once per attempt to build a fresh future. `label` is used
/// in log messages only.
///
/// # Errors
///
/// Returns the first non-transient error unchanged, or
/// [`SourceError::Exhausted`] wrapping the last transient error once every
/// attempt has failed.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= policy.max_attempts() => {
                log::error!("{label}: giving up after {attempt} attempt(s): {e}");
                return Err(SourceError::Exhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                log::warn!(
                    "{label}: transient error (retry {attempt}/{}) in {:?}: {e}",
                    policy.max_retries,
                    policy.delay,
                );
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }
}

/// Sends an HTTP request and parses the response body as JSON, retrying
/// transient failures according to `policy`.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`] (since builders are consumed by
/// `.send()`).
///
/// # Errors
///
/// Returns [`SourceError`] if the request fails permanently or the policy
/// is exhausted.
pub async fn send_json<F>(
    policy: &RetryPolicy,
    build_request: F,
) -> Result<serde_json::Value, SourceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let build_request = &build_request;

    with_retry(policy, "request", move || async move {
        let response = build_request().send().await?;
        let url = response.url().to_string();
        let status = response.status();

        if !status.is_success() {
            return Err(SourceError::Status { status, url });
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            let preview = if text.len() > BODY_PREVIEW_LEN {
                format!("{}...", text.chars().take(BODY_PREVIEW_LEN).collect::<String>())
            } else {
                text.clone()
            };
            log::warn!(
                "JSON parse failed\n  \
                 url: {url}\n  \
                 status: {status}\n  \
                 received: {} bytes\n  \
                 parse error: {e}\n  \
                 body preview: {preview}",
                text.len(),
            );
            SourceError::Json(e)
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unavailable() -> SourceError {
        SourceError::Status {
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            url: "https://example.test/resource/x.json".to_string(),
        }
    }

    fn instant(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let mut calls = 0u32;
        let result = with_retry(&instant(3), "test", || {
            calls += 1;
            let n = calls;
            async move { if n < 3 { Err(unavailable()) } else { Ok(n) } }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let mut calls = 0u32;
        let result: Result<(), _> = with_retry(&instant(2), "test", || {
            calls += 1;
            async { Err(unavailable()) }
        })
        .await;

        assert_eq!(calls, 3);
        match result {
            Err(SourceError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, SourceError::Status { .. }));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let mut calls = 0u32;
        let result: Result<(), _> = with_retry(&instant(5), "test", || {
            calls += 1;
            async {
                Err(SourceError::Status {
                    status: reqwest::StatusCode::NOT_FOUND,
                    url: "https://example.test".to_string(),
                })
            }
        })
        .await;

        assert_eq!(calls, 1);
        assert!(matches!(result, Err(SourceError::Status { .. })));
    }

    #[tokio::test]
    async fn undecodable_body_is_not_retried() {
        let mut calls = 0u32;
        let result: Result<(), _> = with_retry(&instant(3), "test", || {
            calls += 1;
            async {
                Err(SourceError::from(
                    serde_json::from_str::<serde_json::Value>("<html>oops").unwrap_err(),
                ))
            }
        })
        .await;

        assert_eq!(calls, 1);
        assert!(matches!(result, Err(SourceError::Json(_))));
    }

    #[tokio::test]
    async fn rate_limiting_is_transient() {
        let mut calls = 0u32;
        let result = with_retry(&instant(1), "test", || {
            calls += 1;
            let n = calls;
            async move {
                if n == 1 {
                    Err(SourceError::Status {
                        status: reqwest::StatusCode::TOO_MANY_REQUESTS,
                        url: "https://example.test".to_string(),
                    })
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn waits_fixed_delay_between_attempts() {
        let policy = RetryPolicy {
            max_retries: 2,
            delay: Duration::from_secs(10),
        };
        let start = tokio::time::Instant::now();
        let _: Result<(), _> = with_retry(&policy, "test", || async { Err(unavailable()) }).await;

        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[test]
    fn none_policy_allows_single_attempt() {
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
        assert_eq!(RetryPolicy::default().max_attempts(), 4);
    }
}
