//! Retrying HTTP helpers for workloads that are still starting.
//!
//! Right after `setup-test` finishes, a workload pod may not be routed yet and
//! the load balancer answers `404`. These helpers retry on `404` and on
//! connection errors with a fixed interval; any other status counts as an
//! answer from the workload.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

/// Default number of attempts per request.
pub const DEFAULT_ATTEMPTS: u32 = 5;

/// Default pause between attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// How often and how long to retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("{method} {url} did not succeed after {attempts} attempts")]
    Exhausted {
        method: &'static str,
        url: String,
        attempts: u32,
    },
}

/// GET `url` until the workload answers; returns the response body.
pub async fn retry_get(
    client: &reqwest::Client,
    url: &str,
    policy: RetryPolicy,
) -> Result<String, RetryError> {
    retry(policy, "GET", url, || client.get(url)).await
}

/// PUT `body` to `url` until the workload answers; returns the response body.
pub async fn retry_put(
    client: &reqwest::Client,
    url: &str,
    body: &str,
    policy: RetryPolicy,
) -> Result<String, RetryError> {
    retry(policy, "PUT", url, || client.put(url).body(body.to_owned())).await
}

async fn retry<F>(
    policy: RetryPolicy,
    method: &'static str,
    url: &str,
    mut request: F,
) -> Result<String, RetryError>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    for attempt in 1..=policy.attempts {
        match request().send().await {
            Ok(response) => {
                let status = response.status();
                match response.text().await {
                    Ok(text) if status != StatusCode::NOT_FOUND => {
                        info!(method, url, %status, attempt, "workload answered");
                        return Ok(text);
                    }
                    Ok(_) => {
                        info!(method, url, %status, attempt, "route not ready");
                    }
                    Err(e) => {
                        warn!(method, url, %status, attempt, error = %e, "failed to read body");
                    }
                }
            }
            Err(e) => {
                warn!(method, url, attempt, error = %e, "request failed");
            }
        }

        if attempt < policy.attempts {
            sleep(policy.interval).await;
        }
    }

    Err(RetryError::Exhausted {
        method,
        url: url.to_string(),
        attempts: policy.attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.interval, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retry_get_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spin/hello"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Hello world from Spin!"))
            .mount(&server)
            .await;

        let body = retry_get(
            &reqwest::Client::new(),
            &format!("{}/spin/hello", server.uri()),
            fast(),
        )
        .await
        .expect("GET should succeed");

        assert_eq!(body, "Hello world from Spin!");
    }

    #[tokio::test]
    async fn test_retry_get_retries_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slight/hello"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slight/hello"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello world!"))
            .mount(&server)
            .await;

        let body = retry_get(
            &reqwest::Client::new(),
            &format!("{}/slight/hello", server.uri()),
            fast(),
        )
        .await
        .expect("third attempt should succeed");

        assert_eq!(body, "hello world!");
    }

    #[tokio::test]
    async fn test_retry_get_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&server)
            .await;

        let err = retry_get(
            &reqwest::Client::new(),
            &format!("{}/wws/hello", server.uri()),
            fast(),
        )
        .await
        .expect_err("404 every time should exhaust retries");

        assert!(err.to_string().contains("after 3 attempts"));
    }

    #[tokio::test]
    async fn test_server_error_counts_as_answer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let body = retry_get(&reqwest::Client::new(), &server.uri(), fast())
            .await
            .expect("non-404 status is returned to the caller");

        assert_eq!(body, "boom");
    }

    #[tokio::test]
    async fn test_retry_put_sends_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/slight/set"))
            .and(body_string("abc123"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        retry_put(
            &reqwest::Client::new(),
            &format!("{}/slight/set", server.uri()),
            "abc123",
            fast(),
        )
        .await
        .expect("PUT should succeed");
    }
}
