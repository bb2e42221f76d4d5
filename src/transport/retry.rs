use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, Request, Response, StatusCode};
use tracing::debug;

use super::Transport;
use crate::api::error::ApiError;
use crate::config::RetryConfig;

/// Retry budget and backoff bounds for one transport stack.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub wait_min: Duration,
    pub wait_max: Duration,
    pub safe_methods_only: bool,
}

impl RetryPolicy {
    /// Retries transient failures for any method. Used under the token
    /// manager, whose requests carry rebuildable bodies.
    pub fn transient(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            wait_min: Duration::from_millis(cfg.wait_min_ms),
            wait_max: Duration::from_millis(cfg.wait_max_ms),
            safe_methods_only: false,
        }
    }

    /// Retries GET/HEAD/OPTIONS only. Mutating requests are never blindly
    /// replayed; the server offers no idempotency keys.
    pub fn reads(cfg: &RetryConfig) -> Self {
        Self {
            safe_methods_only: true,
            ..Self::transient(cfg)
        }
    }

    fn allows(&self, method: &Method) -> bool {
        if !self.safe_methods_only {
            return true;
        }
        matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
    }

    /// Exponential backoff: wait_min doubled per prior attempt, capped at
    /// wait_max.
    fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.min(16);
        let delay = self.wait_min.saturating_mul(1u32 << shift.min(31));
        delay.min(self.wait_max)
    }
}

/// Transport decorator with bounded retry: network-level errors, 429 and 5xx
/// are retried; everything else is returned immediately. A `Retry-After`
/// header on the failed response overrides the computed backoff.
pub struct RetryTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> RetryTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryTransport<T> {
    async fn send(&self, req: Request) -> Result<Response, ApiError> {
        if !self.policy.allows(req.method()) {
            return self.inner.send(req).await;
        }

        let mut attempt: u32 = 0;
        loop {
            let this_try = match req.try_clone() {
                Some(r) => r,
                // Streaming bodies cannot be re-sent; single attempt.
                None => return self.inner.send(req).await,
            };

            let outcome = self.inner.send(this_try).await;
            let (retryable, retry_after) = match &outcome {
                Ok(resp) => (
                    retryable_status(resp.status()),
                    parse_retry_after(resp.headers()),
                ),
                Err(err) => (err.is_network(), None),
            };

            if !retryable || attempt >= self.policy.max_retries {
                return outcome;
            }

            let delay = retry_after.unwrap_or_else(|| self.policy.backoff(attempt));
            debug!(
                method = %req.method(),
                url = %req.url(),
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "retrying request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// `Retry-After` is either whole seconds or an HTTP date; anything else (or a
/// date in the past) yields no override.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    if let Ok(secs) = raw.trim().parse::<u64>() {
        if secs > 0 {
            return Some(Duration::from_secs(secs));
        }
        return None;
    }
    let at: DateTime<Utc> = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let until = at - Utc::now();
    until.to_std().ok().filter(|d| !d.is_zero())
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    use chrono::Duration as ChronoDuration;
    use reqwest::header::HeaderValue;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::transport::HttpTransport;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            wait_min: Duration::from_millis(10),
            wait_max: Duration::from_millis(50),
            safe_methods_only: true,
        }
    }

    fn transport(max_retries: u32) -> RetryTransport<HttpTransport> {
        RetryTransport::new(
            HttpTransport::new(reqwest::Client::new()),
            policy(max_retries),
        )
    }

    fn get(url: &str) -> Request {
        Request::new(Method::GET, url.parse().unwrap())
    }

    #[tokio::test]
    async fn succeeds_after_k_failures_with_k_plus_one_calls() {
        let server = MockServer::start().await;
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        Mock::given(method("GET"))
            .respond_with(move |_: &wiremock::Request| {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    ResponseTemplate::new(500)
                } else {
                    ResponseTemplate::new(200)
                }
            })
            .expect(3)
            .mount(&server)
            .await;

        let resp = transport(3).send(get(&server.uri())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_budget_and_returns_last_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let resp = transport(2).send(get(&server.uri())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let resp = transport(3).send(get(&server.uri())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn safe_method_policy_sends_unsafe_methods_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let req = Request::new(Method::POST, server.uri().parse().unwrap());
        let resp = transport(3).send(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn honors_retry_after_seconds() {
        let server = MockServer::start().await;
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        Mock::given(method("GET"))
            .respond_with(move |_: &wiremock::Request| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    ResponseTemplate::new(429).insert_header("retry-after", "1")
                } else {
                    ResponseTemplate::new(200)
                }
            })
            .expect(2)
            .mount(&server)
            .await;

        let started = Instant::now();
        let resp = transport(2).send(get(&server.uri())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        // Tolerate scheduling jitter but require far more than the 10ms
        // minimum backoff.
        assert!(started.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn network_errors_are_retried_then_surfaced() {
        // Bind and drop a port so connections are refused.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = transport(1)
            .send(get(&format!("http://{addr}")))
            .await
            .unwrap_err();
        assert!(err.is_network(), "expected network error, got {err:?}");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 5,
            wait_min: Duration::from_millis(200),
            wait_max: Duration::from_secs(2),
            safe_methods_only: false,
        };
        assert_eq!(p.backoff(0), Duration::from_millis(200));
        assert_eq!(p.backoff(1), Duration::from_millis(400));
        assert_eq!(p.backoff(2), Duration::from_millis(800));
        assert_eq!(p.backoff(10), Duration::from_secs(2));
    }

    #[test]
    fn retry_after_parses_seconds_and_http_dates() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        let future = (Utc::now() + ChronoDuration::seconds(30)).to_rfc2822();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(&future).unwrap());
        let d = parse_retry_after(&headers).unwrap();
        assert!(d <= Duration::from_secs(30) && d >= Duration::from_secs(25));

        let past = (Utc::now() - ChronoDuration::seconds(30)).to_rfc2822();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(&past).unwrap());
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("0"));
        assert_eq!(parse_retry_after(&headers), None);
    }
}
