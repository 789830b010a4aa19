//! Error types for the scaling engine.

use autoscaler_state::StateError;
use thiserror::Error;

use crate::adjustment::AdjustmentError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by a runtime-platform client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("app not found: {0}")]
    NotFound(String),

    #[error("platform API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid platform response: {0}")]
    InvalidResponse(String),

    /// No access token could be obtained for the platform API.
    #[error("platform authentication failed: {0}")]
    Auth(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors returned by `ScalingEngine` operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to get app info: {0}")]
    AppInfo(#[source] PlatformError),

    #[error("failed to check app cooldown setting: {0}")]
    Cooldown(#[source] StateError),

    #[error("failed to compute new app instances: {0}")]
    ComputeInstances(#[from] AdjustmentError),

    #[error("failed to get active schedule: {0}")]
    ActiveSchedule(#[source] StateError),

    #[error("failed to get scaling policy: {0}")]
    Policy(#[source] StateError),

    #[error("failed to set app instances: {0}")]
    SetInstances(#[source] PlatformError),

    #[error("store error: {0}")]
    Store(#[source] StateError),
}

impl EngineError {
    /// The app does not exist on the platform.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::AppInfo(e) | Self::SetInstances(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// The request itself was invalid (bad adjustment expression).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ComputeInstances(_))
    }
}
