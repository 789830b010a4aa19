//! HTTP/1.1 exchange with timeout and retry, shared by platform and UAA
//! requests.

use std::time::Duration;

use autoscaler_engine::PlatformError;
use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::tls;

pub(crate) const USER_AGENT: &str = "scalingengine/0.1";

/// How failed exchanges are retried. Transport errors, 429 and 5xx
/// responses are retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    /// Wait before the first retry, doubled for each one after.
    pub wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.wait
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_wait)
    }
}

#[derive(Clone)]
pub(crate) struct HttpTransport {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(
        timeout: Duration,
        retry: RetryPolicy,
        skip_ssl_validation: bool,
    ) -> Result<Self, PlatformError> {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls::client_config(skip_ssl_validation)?)
            .https_or_http()
            .enable_http1()
            .build();
        Ok(Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            timeout,
            retry,
        })
    }

    /// Run the request `build` produces, retrying per the policy. Returns the
    /// last status and body; only transport failures are errors.
    pub async fn execute(
        &self,
        build: impl Fn() -> Result<Request<Full<Bytes>>, PlatformError>,
    ) -> Result<(StatusCode, Bytes), PlatformError> {
        let mut attempt = 0;
        loop {
            let result = self.exchange(build()?).await;
            let retryable = match &result {
                Ok((status, _)) => {
                    status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
                }
                Err(e) => matches!(e, PlatformError::Transport(_)),
            };
            if !retryable || attempt >= self.retry.max_retries {
                return result;
            }
            let wait = self.retry.backoff(attempt);
            attempt += 1;
            warn!(
                attempt,
                max_retries = self.retry.max_retries,
                wait_ms = wait.as_millis() as u64,
                "retrying platform request"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// One request, with the timeout covering connect, send, and reading the
    /// whole body.
    async fn exchange(&self, req: Request<Full<Bytes>>) -> Result<(StatusCode, Bytes), PlatformError> {
        let method = req.method().clone();
        let url = req.uri().to_string();

        let exchange = async {
            let resp = self
                .client
                .request(req)
                .await
                .map_err(|e| PlatformError::Transport(format!("{method} {url}: {e}")))?;
            let status = resp.status();
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| PlatformError::Transport(format!("{method} {url}: {e}")))?
                .to_bytes();
            Ok::<_, PlatformError>((status, body))
        };

        let (status, body) = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(%url, timeout_ms = self.timeout.as_millis() as u64, "platform request timed out");
                return Err(PlatformError::Transport(format!(
                    "{method} {url}: timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };
        debug!(%method, %url, status = status.as_u16(), "platform request");
        Ok((status, body))
    }
}

pub(crate) fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, PlatformError> {
    serde_json::from_slice(body).map_err(|e| PlatformError::InvalidResponse(e.to_string()))
}
