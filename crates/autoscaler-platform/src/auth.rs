//! Platform API credentials and the UAA client_credentials grant.
//!
//! The UAA endpoint is discovered once from the platform's root document
//! (`GET {api}/`, `links.uaa.href`). Granted tokens are cached until less
//! than ten minutes of their lifetime remain.

use std::fmt;
use std::time::{Duration, Instant};

use autoscaler_engine::PlatformError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::{Method, Request, header};
use http_body_util::Full;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::transport::{HttpTransport, USER_AGENT, decode};

const REFRESH_BEFORE_EXPIRY: Duration = Duration::from_secs(10 * 60);
const TOKEN_PATH: &str = "/oauth/token";

/// How requests to the platform API are authorized.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    #[default]
    None,
    /// A static bearer token.
    Bearer(String),
    /// A UAA client that logs in with the client_credentials grant.
    ClientCredentials { client_id: String, secret: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bearer(_) => f.write_str("Bearer(..)"),
            Self::ClientCredentials { client_id, .. } => f
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RootInfo {
    links: RootLinks,
}

#[derive(Debug, Deserialize)]
struct RootLinks {
    uaa: Link,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

struct CachedToken {
    authorization: String,
    granted_at: Instant,
    lifetime: Duration,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.granted_at.elapsed() < self.lifetime.saturating_sub(REFRESH_BEFORE_EXPIRY)
    }
}

#[derive(Default)]
struct TokenState {
    token_url: Option<String>,
    token: Option<CachedToken>,
}

/// Produces the `Authorization` header for platform requests.
pub(crate) struct Authenticator {
    credentials: Credentials,
    // Held across the grant request so concurrent callers share one login.
    state: Mutex<TokenState>,
}

impl Authenticator {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            state: Mutex::new(TokenState::default()),
        }
    }

    /// Whether a 401 can be cured by fetching a new token.
    pub fn refreshes_on_unauthorized(&self) -> bool {
        matches!(self.credentials, Credentials::ClientCredentials { .. })
    }

    /// The header value to send, `None` when no credentials are configured.
    pub async fn authorization(
        &self,
        http: &HttpTransport,
        api: &str,
    ) -> Result<Option<String>, PlatformError> {
        let (client_id, secret) = match &self.credentials {
            Credentials::None => return Ok(None),
            Credentials::Bearer(token) if token.is_empty() => return Ok(None),
            Credentials::Bearer(token) => return Ok(Some(format!("Bearer {token}"))),
            Credentials::ClientCredentials { client_id, secret } => (client_id, secret),
        };

        let mut state = self.state.lock().await;
        if let Some(token) = state.token.as_ref().filter(|t| t.is_fresh()) {
            return Ok(Some(token.authorization.clone()));
        }
        let token_url = match &state.token_url {
            Some(url) => url.clone(),
            None => {
                let url = discover_token_url(http, api).await?;
                debug!(%url, "UAA token endpoint discovered");
                state.token_url = Some(url.clone());
                url
            }
        };

        let grant = request_grant(http, &token_url, client_id, secret).await?;
        info!(%client_id, expires_in = grant.expires_in, "platform access token granted");
        let authorization = format!("Bearer {}", grant.access_token);
        state.token = Some(CachedToken {
            authorization: authorization.clone(),
            granted_at: Instant::now(),
            lifetime: Duration::from_secs(grant.expires_in),
        });
        Ok(Some(authorization))
    }

    /// Drop the cached token so the next request logs in again.
    pub async fn invalidate(&self) {
        self.state.lock().await.token = None;
    }
}

async fn discover_token_url(http: &HttpTransport, api: &str) -> Result<String, PlatformError> {
    let url = format!("{api}/");
    let (status, body) = http
        .execute(|| {
            Request::builder()
                .method(Method::GET)
                .uri(&url)
                .header(header::ACCEPT, "application/json")
                .header(header::USER_AGENT, USER_AGENT)
                .body(Full::new(Bytes::new()))
                .map_err(|e| PlatformError::Transport(format!("invalid request {url}: {e}")))
        })
        .await?;
    if !status.is_success() {
        return Err(PlatformError::Auth(format!(
            "failed to get UAA endpoint: {url} returned {}",
            status.as_u16()
        )));
    }
    let root: RootInfo = decode(&body)?;
    Ok(format!("{}{TOKEN_PATH}", root.links.uaa.href.trim_end_matches('/')))
}

async fn request_grant(
    http: &HttpTransport,
    token_url: &str,
    client_id: &str,
    secret: &str,
) -> Result<TokenGrant, PlatformError> {
    let form = format!(
        "grant_type=client_credentials&client_id={}&client_secret={}",
        utf8_percent_encode(client_id, NON_ALPHANUMERIC),
        utf8_percent_encode(secret, NON_ALPHANUMERIC),
    );
    let basic = format!("Basic {}", STANDARD.encode(format!("{client_id}:{secret}")));
    let (status, body) = http
        .execute(|| {
            Request::builder()
                .method(Method::POST)
                .uri(token_url)
                .header(header::ACCEPT, "application/json")
                .header(
                    header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded;charset=utf-8",
                )
                .header(header::AUTHORIZATION, &basic)
                .header(header::USER_AGENT, USER_AGENT)
                .body(Full::new(Bytes::from(form.clone())))
                .map_err(|e| PlatformError::Transport(format!("invalid request {token_url}: {e}")))
        })
        .await?;
    if !status.is_success() {
        return Err(PlatformError::Auth(format!(
            "client credential grant returned {}: {}",
            status.as_u16(),
            String::from_utf8_lossy(&body)
        )));
    }
    decode(&body)
}
