//! HTTP middleware for API sessions.

use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next};
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`.
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << retry.min(16))
    }
}

/// Retries requests that fail with a 5xx status or a connect/timeout error.
///
/// 4xx responses (including 401) pass straight through; token refresh is the
/// caller's responsibility.
pub struct TransientRetryMiddleware {
    policy: RetryPolicy,
}

impl TransientRetryMiddleware {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait::async_trait]
impl Middleware for TransientRetryMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let mut retry = 0;
        loop {
            // Streaming bodies cannot be replayed
            let Some(attempt) = req.try_clone() else {
                return next.run(req, extensions).await;
            };

            let result = next.clone().run(attempt, extensions).await;
            let transient = match &result {
                Ok(response) => response.status().is_server_error(),
                Err(reqwest_middleware::Error::Reqwest(e)) => e.is_timeout() || e.is_connect(),
                Err(_) => false,
            };

            if !transient {
                return result;
            }
            if retry >= self.policy.max_retries {
                debug!(url = %req.url(), retries = retry, "Transient retries exhausted");
                return result;
            }

            let delay = self.policy.backoff(retry);
            retry += 1;
            warn!(
                url = %req.url(),
                status = result.as_ref().ok().map(|r| r.status().as_u16()),
                retry,
                max_retries = self.policy.max_retries,
                delay = crate::utils::fmt_duration(delay),
                "Transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest_middleware::ClientBuilder;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = ClientBuilder::new(reqwest::Client::new())
            .with(TransientRetryMiddleware::new(fast_policy(5)))
            .build();
        let response = client
            .get(format!("{}/flaky", server.uri()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .expect(6)
            .mount(&server)
            .await;

        let client = ClientBuilder::new(reqwest::Client::new())
            .with(TransientRetryMiddleware::new(fast_policy(5)))
            .build();
        let response = client
            .get(format!("{}/down", server.uri()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 503);
    }

    #[tokio::test]
    async fn does_not_retry_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/secure"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = ClientBuilder::new(reqwest::Client::new())
            .with(TransientRetryMiddleware::new(fast_policy(5)))
            .build();
        let response = client
            .get(format!("{}/secure", server.uri()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
    }
}
