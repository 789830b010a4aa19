//! Cloud Controller v3 client.
//!
//! Requests are authorized per the configured `Credentials`. With a UAA
//! client, a 401 drops the cached token and the request is sent once more
//! with a fresh one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autoscaler_engine::{
    AppAndProcesses, DISABLE_AUTOSCALING_LABEL, PlatformClient, PlatformError, ProcessType,
};
use bytes::Bytes;
use http::{Method, Request, StatusCode, header};
use http_body_util::Full;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, PercentEncode, utf8_percent_encode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::auth::{Authenticator, Credentials};
use crate::transport::{HttpTransport, RetryPolicy, USER_AGENT, decode};

/// Characters escaped in an app id path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'~');

fn segment(app_id: &str) -> PercentEncode<'_> {
    utf8_percent_encode(app_id, SEGMENT)
}

#[derive(Debug, Deserialize)]
struct AppResource {
    state: String,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    /// Label values may be `null`.
    #[serde(default)]
    labels: HashMap<String, Option<String>>,
}

#[derive(Debug, Deserialize)]
struct ProcessResource {
    instances: i32,
}

/// Settings for a [`CloudControllerClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL, `http://` or `https://`.
    pub api: String,
    pub credentials: Credentials,
    pub timeout: Duration,
    /// Accept any server certificate.
    pub skip_ssl_validation: bool,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    pub fn new(api: impl Into<String>) -> Self {
        Self {
            api: api.into(),
            credentials: Credentials::None,
            timeout: Duration::from_secs(10),
            skip_ssl_validation: false,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_skip_ssl_validation(mut self, skip: bool) -> Self {
        self.skip_ssl_validation = skip;
        self
    }
}

/// HTTP client for the runtime platform's v3 API.
#[derive(Clone)]
pub struct CloudControllerClient {
    api: String,
    http: HttpTransport,
    auth: Arc<Authenticator>,
}

impl CloudControllerClient {
    pub fn new(config: ClientConfig) -> Result<Self, PlatformError> {
        let api = config.api.trim_end_matches('/').to_string();
        let http = HttpTransport::new(config.timeout, config.retry, config.skip_ssl_validation)?;
        Ok(Self {
            api,
            http,
            auth: Arc::new(Authenticator::new(config.credentials)),
        })
    }

    pub fn api(&self) -> &str {
        &self.api
    }

    async fn get_app(&self, app_id: &str) -> Result<AppResource, PlatformError> {
        let path = format!("/v3/apps/{}", segment(app_id));
        let body = self.send(Method::GET, app_id, &path, Bytes::new()).await?;
        decode(&body)
    }

    /// Send a request and return the body of a 2xx response.
    async fn send(
        &self,
        method: Method,
        app_id: &str,
        path: &str,
        body: Bytes,
    ) -> Result<Bytes, PlatformError> {
        let url = format!("{}{path}", self.api);
        let mut refreshed = false;
        let (status, response) = loop {
            let authorization = self.auth.authorization(&self.http, &self.api).await?;
            let (status, resp) = self
                .http
                .execute(|| {
                    let mut builder = Request::builder()
                        .method(method.clone())
                        .uri(&url)
                        .header(header::ACCEPT, "application/json")
                        .header(header::CONTENT_TYPE, "application/json")
                        .header(header::USER_AGENT, USER_AGENT);
                    if let Some(value) = &authorization {
                        builder = builder.header(header::AUTHORIZATION, value);
                    }
                    builder
                        .body(Full::new(body.clone()))
                        .map_err(|e| PlatformError::Transport(format!("invalid request {url}: {e}")))
                })
                .await?;
            if status == StatusCode::UNAUTHORIZED
                && !refreshed
                && self.auth.refreshes_on_unauthorized()
            {
                info!(%url, "platform rejected the access token, logging in again");
                self.auth.invalidate().await;
                refreshed = true;
                continue;
            }
            break (status, resp);
        };

        if status == StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound(app_id.to_string()));
        }
        if !status.is_success() {
            return Err(PlatformError::Api {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&response).into_owned(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl PlatformClient for CloudControllerClient {
    async fn get_app_and_processes(&self, app_id: &str) -> Result<AppAndProcesses, PlatformError> {
        let (app, instances) = tokio::try_join!(
            self.get_app(app_id),
            self.get_app_processes(app_id, ProcessType::Web)
        )?;
        Ok(AppAndProcesses {
            state: app.state,
            instances,
            disable_autoscaling: app
                .metadata
                .labels
                .get(DISABLE_AUTOSCALING_LABEL)
                .map(|value| value.clone().unwrap_or_default()),
        })
    }

    async fn get_app_processes(
        &self,
        app_id: &str,
        process_type: ProcessType,
    ) -> Result<i32, PlatformError> {
        let path = format!("/v3/apps/{}/processes/{process_type}", segment(app_id));
        let body = self.send(Method::GET, app_id, &path, Bytes::new()).await?;
        let process: ProcessResource = decode(&body)?;
        Ok(process.instances)
    }

    async fn scale_app_web_process(
        &self,
        app_id: &str,
        instances: i32,
    ) -> Result<(), PlatformError> {
        let path = format!("/v3/apps/{}/processes/web/actions/scale", segment(app_id));
        let payload = serde_json::to_vec(&serde_json::json!({ "instances": instances }))
            .map_err(|e| PlatformError::InvalidResponse(e.to_string()))?;
        self.send(Method::POST, app_id, &path, Bytes::from(payload))
            .await?;
        debug!(%app_id, instances, "web process scaled");
        Ok(())
    }
}
