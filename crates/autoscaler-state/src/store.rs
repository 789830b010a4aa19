//! StateStore — redb-backed persistence for the scaling engine.
//!
//! Provides typed operations over policies, scaling histories, cooldown
//! expiries and active schedules. Values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Tables holding JSON-serialized rows keyed by app id.
type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Records sharing one app id and nanosecond get distinct suffixes up to this.
const MAX_HISTORY_SEQ: u16 = 9999;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(POLICIES).map_err(map_err!(Table))?;
        txn.open_table(SCALING_HISTORIES).map_err(map_err!(Table))?;
        txn.open_table(SCALING_COOLDOWNS).map_err(map_err!(Table))?;
        txn.open_table(ACTIVE_SCHEDULES).map_err(map_err!(Table))?;
        txn.open_table(SCHEDULER_ACTIVE_SCHEDULES)
            .map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic JSON rows ─────────────────────────────────────────

    fn put_json<T: serde::Serialize>(
        &self,
        table_def: JsonTable,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        table_def: JsonTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn delete_row(&self, table_def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    fn list_json<T: serde::de::DeserializeOwned>(
        &self,
        table_def: JsonTable,
    ) -> StateResult<Vec<(String, T)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let row: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push((key.value().to_string(), row));
        }
        Ok(results)
    }

    // ── Policies ──────────────────────────────────────────────────

    /// Insert or replace the default policy of an app.
    pub fn put_policy(&self, app_id: &str, policy: &ScalingPolicy) -> StateResult<()> {
        self.put_json(POLICIES, app_id, policy)?;
        debug!(%app_id, "policy stored");
        Ok(())
    }

    /// Get the default policy of an app, `None` if no policy is set.
    pub fn get_policy(&self, app_id: &str) -> StateResult<Option<ScalingPolicy>> {
        self.get_json(POLICIES, app_id)
    }

    // ── Scaling history ───────────────────────────────────────────

    /// Append a scaling history record.
    pub fn save_scaling_history(&self, history: &AppScalingHistory) -> StateResult<()> {
        let value = serde_json::to_vec(history).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn
                .open_table(SCALING_HISTORIES)
                .map_err(map_err!(Table))?;
            let mut seq = 0;
            let mut key = history.table_key(seq);
            while table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                if seq == MAX_HISTORY_SEQ {
                    return Err(StateError::Write(format!(
                        "too many scaling histories for {} at {}",
                        history.app_id, history.timestamp
                    )));
                }
                seq += 1;
                key = history.table_key(seq);
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(app_id = %history.app_id, status = ?history.status, "scaling history saved");
        Ok(())
    }

    /// Visit the histories of an app within `[start, end]` (nanoseconds) in
    /// the given order. Ignored records are skipped unless `include_all`.
    fn scan_histories(
        &self,
        app_id: &str,
        start: i64,
        end: i64,
        order: HistoryOrder,
        include_all: bool,
        mut visit: impl FnMut(AppScalingHistory) -> bool,
    ) -> StateResult<()> {
        let end = if end < 0 { now_nanos() } else { end };
        if end < start {
            return Ok(());
        }
        let lo = history_key(app_id, start, 0);
        let hi = history_key(app_id, end, MAX_HISTORY_SEQ);

        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn
            .open_table(SCALING_HISTORIES)
            .map_err(map_err!(Table))?;
        let range = table
            .range(lo.as_str()..=hi.as_str())
            .map_err(map_err!(Read))?;
        match order {
            HistoryOrder::Asc => visit_histories(range, include_all, &mut visit),
            HistoryOrder::Desc => visit_histories(range.rev(), include_all, &mut visit),
        }
    }

    /// Retrieve one page (1-based) of scaling histories for an app.
    ///
    /// A negative `end` means "up to now".
    #[allow(clippy::too_many_arguments)]
    pub fn retrieve_scaling_histories(
        &self,
        app_id: &str,
        start: i64,
        end: i64,
        order: HistoryOrder,
        include_all: bool,
        page: usize,
        results_per_page: usize,
    ) -> StateResult<Vec<AppScalingHistory>> {
        let mut skip = page.saturating_sub(1).saturating_mul(results_per_page);
        let mut results = Vec::new();
        if results_per_page == 0 {
            return Ok(results);
        }
        self.scan_histories(app_id, start, end, order, include_all, |history| {
            if skip > 0 {
                skip -= 1;
                return true;
            }
            results.push(history);
            results.len() < results_per_page
        })?;
        Ok(results)
    }

    /// Count the scaling histories of an app within `[start, end]`.
    pub fn count_scaling_histories(
        &self,
        app_id: &str,
        start: i64,
        end: i64,
        include_all: bool,
    ) -> StateResult<usize> {
        let mut count = 0;
        self.scan_histories(app_id, start, end, HistoryOrder::Asc, include_all, |_| {
            count += 1;
            true
        })?;
        Ok(count)
    }

    /// Delete every history record at or before `before` (nanoseconds).
    /// Returns the number of records deleted.
    ///
    /// Only keys are read; the timestamp is part of each key.
    pub fn prune_scaling_histories(&self, before: i64) -> StateResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let pruned;
        {
            let mut table = txn
                .open_table(SCALING_HISTORIES)
                .map_err(map_err!(Table))?;
            let mut expired = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                let key = key.value();
                match history_key_timestamp(key) {
                    Some(ts) if ts <= before => expired.push(key.to_string()),
                    Some(_) => {}
                    None => warn!(key, "skipping malformed scaling history key"),
                }
            }
            for key in &expired {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            pruned = expired.len();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(before, count = pruned, "scaling histories pruned");
        Ok(pruned)
    }

    // ── Cooldown ──────────────────────────────────────────────────

    /// Whether the app is out of its cooldown period at `now` (nanoseconds).
    ///
    /// Always returns the stored expiry alongside the verdict, `0` if the
    /// app has never been scaled.
    pub fn can_scale_app(&self, app_id: &str, now: i64) -> StateResult<(bool, i64)> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn
            .open_table(SCALING_COOLDOWNS)
            .map_err(map_err!(Table))?;
        match table.get(app_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let expire_at = guard.value();
                Ok((expire_at < now, expire_at))
            }
            None => Ok((true, 0)),
        }
    }

    /// Record when the cooldown of an app expires (nanoseconds).
    pub fn update_scaling_cooldown_expire_time(
        &self,
        app_id: &str,
        expire_at: i64,
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn
                .open_table(SCALING_COOLDOWNS)
                .map_err(map_err!(Table))?;
            table.insert(app_id, expire_at).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%app_id, expire_at, "cooldown expiry updated");
        Ok(())
    }

    // ── Active schedules (engine view) ────────────────────────────

    /// Get the active schedule the engine recorded for an app.
    pub fn get_active_schedule(&self, app_id: &str) -> StateResult<Option<ActiveSchedule>> {
        self.get_json(ACTIVE_SCHEDULES, app_id)
    }

    /// Record (or replace) the active schedule of an app.
    pub fn set_active_schedule(&self, app_id: &str, schedule: &ActiveSchedule) -> StateResult<()> {
        self.put_json(ACTIVE_SCHEDULES, app_id, schedule)?;
        debug!(%app_id, schedule_id = %schedule.schedule_id, "active schedule stored");
        Ok(())
    }

    /// Remove the active schedule of an app. Returns true if it existed.
    pub fn remove_active_schedule(&self, app_id: &str) -> StateResult<bool> {
        let existed = self.delete_row(ACTIVE_SCHEDULES, app_id)?;
        debug!(%app_id, existed, "active schedule removed");
        Ok(existed)
    }

    /// All active schedules the engine knows of: app id → schedule id.
    pub fn get_active_schedules(&self) -> StateResult<HashMap<AppId, ScheduleId>> {
        Ok(self
            .list_json::<ActiveSchedule>(ACTIVE_SCHEDULES)?
            .into_iter()
            .map(|(app_id, schedule)| (app_id, schedule.schedule_id))
            .collect())
    }

    // ── Active schedules (scheduler view) ─────────────────────────

    /// Record the scheduler's active schedule for an app.
    pub fn put_scheduler_active_schedule(
        &self,
        app_id: &str,
        schedule: &ActiveSchedule,
    ) -> StateResult<()> {
        self.put_json(SCHEDULER_ACTIVE_SCHEDULES, app_id, schedule)
    }

    /// The scheduler's full view: app id → active schedule.
    pub fn list_scheduler_active_schedules(&self) -> StateResult<HashMap<AppId, ActiveSchedule>> {
        Ok(self
            .list_json(SCHEDULER_ACTIVE_SCHEDULES)?
            .into_iter()
            .collect())
    }
}

type HistoryEntry<'a> = Result<
    (
        redb::AccessGuard<'a, &'static str>,
        redb::AccessGuard<'a, &'static [u8]>,
    ),
    redb::StorageError,
>;

fn visit_histories<'a>(
    entries: impl Iterator<Item = HistoryEntry<'a>>,
    include_all: bool,
    visit: &mut impl FnMut(AppScalingHistory) -> bool,
) -> StateResult<()> {
    for entry in entries {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let history: AppScalingHistory =
            serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        if !include_all && history.status == ScalingStatus::Ignored {
            continue;
        }
        if !visit(history) {
            break;
        }
    }
    Ok(())
}

/// Current wall-clock time in unix nanoseconds.
pub fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}
