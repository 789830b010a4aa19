//! Scaling history retention.

use std::sync::Arc;
use std::time::Duration;

use autoscaler_state::{StateResult, StateStore};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::clock::{Clock, SystemClock, unix_nanos};

/// Deletes scaling histories older than a cutoff from the engine store.
pub struct HistoryPruner {
    store: StateStore,
    cutoff: Duration,
    clock: Arc<dyn Clock>,
}

impl HistoryPruner {
    pub fn new(store: StateStore, cutoff: Duration) -> Self {
        Self {
            store,
            cutoff,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Delete every history stamped at or before `now - cutoff`. Returns the
    /// number deleted.
    pub fn prune(&self) -> StateResult<usize> {
        let before = self
            .clock
            .now()
            .checked_sub(self.cutoff)
            .map(unix_nanos)
            .unwrap_or(0);
        let pruned = self.store.prune_scaling_histories(before)?;
        if pruned > 0 {
            info!(pruned, before, "old scaling histories deleted");
        }
        Ok(pruned)
    }

    /// Prune immediately, then every `interval`, until `shutdown` changes.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            cutoff_secs = self.cutoff.as_secs(),
            "scaling history pruner started"
        );
        loop {
            if let Err(e) = self.prune() {
                error!(error = %e, "failed to prune scaling histories");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    debug!("scaling history pruner shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use autoscaler_state::{AppScalingHistory, HistoryOrder, ScalingType};

    use super::*;
    use crate::fakes::FakeClock;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);
    const NOW: u64 = 1_700_000_000_000_000_000;

    fn save(store: &StateStore, app_id: &str, age: Duration) {
        let timestamp = NOW as i64 - age.as_nanos() as i64;
        store
            .save_scaling_history(&AppScalingHistory::pending(
                app_id,
                timestamp,
                ScalingType::Dynamic,
                "+1 instance(s) because memoryused > 80MB for 120 seconds".to_string(),
            ))
            .unwrap();
    }

    fn timestamps(store: &StateStore, app_id: &str) -> Vec<i64> {
        store
            .retrieve_scaling_histories(app_id, 0, i64::MAX, HistoryOrder::Asc, true, 1, 50)
            .unwrap()
            .into_iter()
            .map(|h| h.timestamp)
            .collect()
    }

    fn pruner(store: &StateStore, cutoff: Duration) -> HistoryPruner {
        HistoryPruner::new(store.clone(), cutoff)
            .with_clock(Arc::new(FakeClock::at_unix_nanos(NOW)))
    }

    #[test]
    fn prunes_histories_older_than_cutoff() {
        let store = StateStore::open_in_memory().unwrap();
        save(&store, "app-1", DAY * 40);
        save(&store, "app-1", DAY * 30);
        save(&store, "app-1", DAY * 2);
        save(&store, "app-2", DAY * 31);

        assert_eq!(pruner(&store, DAY * 30).prune().unwrap(), 3);
        assert_eq!(timestamps(&store, "app-1"), vec![(NOW - (DAY * 2).as_nanos() as u64) as i64]);
        assert!(timestamps(&store, "app-2").is_empty());
    }

    #[test]
    fn cutoff_before_the_epoch_prunes_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        save(&store, "app-1", DAY);

        let pruner = HistoryPruner::new(store.clone(), DAY * 365 * 100)
            .with_clock(Arc::new(FakeClock::at_unix_nanos(NOW)));
        assert_eq!(pruner.prune().unwrap(), 0);
        assert_eq!(timestamps(&store, "app-1").len(), 1);
    }

    #[tokio::test]
    async fn run_prunes_immediately_and_stops_on_shutdown() {
        let store = StateStore::open_in_memory().unwrap();
        save(&store, "app-1", DAY * 60);
        let (tx, rx) = watch::channel(false);

        let pruner = Arc::new(pruner(&store, DAY * 30));
        let task = tokio::spawn({
            let pruner = pruner.clone();
            async move { pruner.run(Duration::from_secs(3600), rx).await }
        });

        for _ in 0..100 {
            if timestamps(&store, "app-1").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(timestamps(&store, "app-1").is_empty());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("pruner did not stop")
            .unwrap();
    }
}
