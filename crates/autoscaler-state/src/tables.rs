//! redb table definitions for the autoscaler state store.
//!
//! Most tables use `&str` keys (the application id) and `&[u8]` values
//! holding JSON-serialized domain types.

use redb::TableDefinition;

/// Default scaling policies keyed by `{app_id}`.
pub const POLICIES: TableDefinition<&str, &[u8]> = TableDefinition::new("policies");

/// Scaling history keyed by `{app_id}/{timestamp:020}-{seq:04}`.
pub const SCALING_HISTORIES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("scaling_histories");

/// Cooldown expiry (unix nanoseconds) keyed by `{app_id}`.
pub const SCALING_COOLDOWNS: TableDefinition<&str, i64> =
    TableDefinition::new("scaling_cooldowns");

/// The scaling engine's own active schedule per app, keyed by `{app_id}`.
pub const ACTIVE_SCHEDULES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("active_schedules");

/// The scheduler's view of the active schedule per app, keyed by `{app_id}`.
pub const SCHEDULER_ACTIVE_SCHEDULES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("scheduler_active_schedules");
