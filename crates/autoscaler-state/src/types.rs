//! Domain types for the autoscaler state store.
//!
//! These types describe scaling requests, active schedules, default
//! policies, and the scaling history audit trail. All types are
//! serializable to/from JSON, both for storage in redb tables and for the
//! REST API.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application identifier (a platform GUID).
pub type AppId = String;

/// Opaque identifier of one schedule occurrence.
pub type ScheduleId = String;

/// Sentinel for an instance count that was never read.
pub const UNKNOWN_INSTANCES: i32 = -1;

// ── Scaling requests ──────────────────────────────────────────────

/// A dynamic scaling request produced by upstream breach detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Trigger {
    #[serde(default)]
    pub app_id: AppId,
    pub metric_type: String,
    #[serde(default)]
    pub metric_unit: String,
    #[serde(default, rename = "breach_duration_secs")]
    pub breach_duration_seconds: i64,
    #[serde(default)]
    pub threshold: i64,
    #[serde(default)]
    pub operator: String,
    /// Cooldown after a successful scaling; `<= 0` means "use the default".
    #[serde(default, rename = "cool_down_secs")]
    pub cool_down_seconds: i64,
    /// Step (`"+1"`, `"-2"`) or percentage (`"10%"`, `"-60%"`) adjustment.
    pub adjustment: String,
}

/// Longest cooldown a trigger can request (about 136 years).
pub const MAX_COOL_DOWN_SECS: u64 = u32::MAX as u64;

impl Trigger {
    /// The cooldown to apply after a successful scaling, capped at
    /// `MAX_COOL_DOWN_SECS`.
    pub fn cool_down(&self, default_cool_down_secs: u64) -> Duration {
        let secs = match u64::try_from(self.cool_down_seconds) {
            Ok(secs) if secs > 0 => secs,
            _ => default_cool_down_secs,
        };
        Duration::from_secs(secs.min(MAX_COOL_DOWN_SECS))
    }
}

// ── Schedules & policies ──────────────────────────────────────────

/// A scheduled scaling window that is currently in effect for an app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ActiveSchedule {
    #[serde(default)]
    pub schedule_id: ScheduleId,
    #[serde(rename = "instance_min_count")]
    pub instance_min: i32,
    #[serde(rename = "instance_max_count")]
    pub instance_max: i32,
    /// Floor applied only when the schedule starts.
    #[serde(default, rename = "initial_min_instance_count")]
    pub instance_min_initial: i32,
}

/// Default instance bounds for an app without an active schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScalingPolicy {
    #[serde(rename = "instance_min_count")]
    pub instance_min: i32,
    #[serde(rename = "instance_max_count")]
    pub instance_max: i32,
}

// ── Scaling history ───────────────────────────────────────────────

/// What started a scaling attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingType {
    Dynamic,
    Schedule,
}

/// Outcome of a scaling attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScalingStatus {
    Succeeded,
    #[default]
    Failed,
    Ignored,
}

/// Audit record of one scaling decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppScalingHistory {
    pub app_id: AppId,
    /// Unix timestamp (nanoseconds) of the decision.
    pub timestamp: i64,
    pub scaling_type: ScalingType,
    pub status: ScalingStatus,
    /// Instance count before the decision, `-1` if never read.
    pub old_instances: i32,
    /// Instance count after the decision, `-1` if never computed.
    pub new_instances: i32,
    /// Why scaling was attempted.
    pub reason: String,
    /// Limit clamp or ignore reason.
    #[serde(default)]
    pub message: String,
    /// Failure cause.
    #[serde(default)]
    pub error: String,
}

impl AppScalingHistory {
    /// A pending record with both instance counts unknown.
    pub fn pending(
        app_id: &str,
        timestamp: i64,
        scaling_type: ScalingType,
        reason: String,
    ) -> Self {
        Self {
            app_id: app_id.to_string(),
            timestamp,
            scaling_type,
            status: ScalingStatus::default(),
            old_instances: UNKNOWN_INSTANCES,
            new_instances: UNKNOWN_INSTANCES,
            reason,
            message: String::new(),
            error: String::new(),
        }
    }

    /// Build the composite key for the scaling history table.
    pub fn table_key(&self, seq: u16) -> String {
        history_key(&self.app_id, self.timestamp, seq)
    }
}

/// Result of a dynamic scaling request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppScalingResult {
    pub app_id: AppId,
    pub status: ScalingStatus,
    /// Signed instance delta actually applied.
    pub adjustment: i32,
    /// Unix nanoseconds after which the app may be scaled again.
    pub cooldown_expired_at: i64,
}

/// Sort order for scaling history retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOrder {
    Asc,
    #[default]
    Desc,
}

/// Key of a history record. Timestamps are padded so that lexicographic
/// order equals chronological order within one app.
pub(crate) fn history_key(app_id: &str, timestamp: i64, seq: u16) -> String {
    format!("{app_id}/{:020}-{seq:04}", timestamp.max(0))
}

/// The timestamp encoded in a history key, `None` if the key is malformed.
pub(crate) fn history_key_timestamp(key: &str) -> Option<i64> {
    let (_, suffix) = key.rsplit_once('/')?;
    let (timestamp, seq) = suffix.split_once('-')?;
    if timestamp.len() != 20 || seq.len() != 4 {
        return None;
    }
    timestamp.parse().ok()
}
