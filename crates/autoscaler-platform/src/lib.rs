//! autoscaler-platform — runtime platform API client.
//!
//! `CloudControllerClient` implements the engine's `PlatformClient` trait
//! over HTTP/1.1 (plain or TLS via rustls): it reads an app's lifecycle
//! state, labels, and process instance counts, and scales the web process.
//! Requests can carry a static bearer token or one obtained from UAA with
//! the client_credentials grant, and transient failures are retried with
//! exponential backoff.
//!
//! # Endpoints
//!
//! ```text
//! GET  {api}/                                            links.uaa.href
//! POST {uaa}/oauth/token                                 client_credentials grant
//! GET  {api}/v3/apps/{guid}                              state, metadata.labels
//! GET  {api}/v3/apps/{guid}/processes/{type}             instances
//! POST {api}/v3/apps/{guid}/processes/web/actions/scale  {"instances": n}
//! ```

pub mod auth;
pub mod client;
mod tls;
mod transport;

pub use auth::Credentials;
pub use client::{ClientConfig, CloudControllerClient};
pub use transport::RetryPolicy;
