//! Service wiring and the serve loop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use autoscaler_api::ApiState;
use autoscaler_engine::{ActiveScheduleSynchronizer, HistoryPruner, ScalingEngine, StripedLock};
use autoscaler_platform::CloudControllerClient;
use autoscaler_state::StateStore;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::Config;

/// Every long-lived component of the daemon.
pub struct Services {
    #[cfg_attr(not(test), allow(dead_code))]
    pub policy_store: StateStore,
    pub engine_store: StateStore,
    #[cfg_attr(not(test), allow(dead_code))]
    pub scheduler_store: StateStore,
    pub engine: Arc<ScalingEngine>,
    pub synchronizer: Arc<ActiveScheduleSynchronizer>,
    pub pruner: Arc<HistoryPruner>,
}

impl Services {
    pub fn build(config: &Config) -> anyhow::Result<Self> {
        let mut opened = HashMap::new();
        let policy_store = open_store(&config.db.policy_db, &mut opened)?;
        let engine_store = open_store(&config.db.scalingengine_db, &mut opened)?;
        let scheduler_store = open_store(&config.db.scheduler_db, &mut opened)?;

        let client_config = config.platform.client_config();
        let platform = CloudControllerClient::new(client_config.clone())
            .context("failed to build platform client")?;
        info!(
            api = %platform.api(),
            credentials = ?client_config.credentials,
            timeout = ?client_config.timeout,
            max_retries = client_config.retry.max_retries,
            "platform client configured"
        );

        let engine = Arc::new(
            ScalingEngine::new(
                Arc::new(platform),
                Arc::new(policy_store.clone()),
                Arc::new(engine_store.clone()),
                StripedLock::new(config.lock_stripes()),
            )
            .with_default_cool_down_secs(config.default_cool_down_secs),
        );
        info!(
            lock_size = config.lock_size,
            default_cool_down_secs = config.default_cool_down_secs,
            "scaling engine initialized"
        );

        let synchronizer = Arc::new(ActiveScheduleSynchronizer::new(
            Arc::new(scheduler_store.clone()),
            Arc::new(engine_store.clone()),
            engine.clone(),
        ));

        let pruner = Arc::new(HistoryPruner::new(
            engine_store.clone(),
            config.pruner.cutoff(),
        ));

        Ok(Self {
            policy_store,
            engine_store,
            scheduler_store,
            engine,
            synchronizer,
            pruner,
        })
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            engine: self.engine.clone(),
            store: self.engine_store.clone(),
            synchronizer: self.synchronizer.clone(),
        }
    }
}

/// Open the store at `path`, sharing one handle when several roles point
/// at the same file.
fn open_store(path: &Path, opened: &mut HashMap<PathBuf, StateStore>) -> anyhow::Result<StateStore> {
    if let Some(store) = opened.get(path) {
        return Ok(store.clone());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = StateStore::open(path)
        .with_context(|| format!("failed to open state store {}", path.display()))?;
    info!(path = ?path, "state store opened");
    opened.insert(path.to_path_buf(), store.clone());
    Ok(store)
}

/// Serve the API until Ctrl-C, running the schedule synchronizer alongside.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let services = Services::build(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let synchronizer = services.synchronizer.clone();
    let interval = config.synchronizer.active_schedule_sync_interval;
    info!(?interval, "active schedule synchronizer starting");
    let sync_shutdown = shutdown_rx.clone();
    let sync_handle = tokio::spawn(async move {
        synchronizer.run(interval, sync_shutdown).await;
    });

    let pruner = services.pruner.clone();
    let prune_interval = config.pruner.interval;
    let prune_handle = tokio::spawn(async move {
        pruner.run(prune_interval, shutdown_rx).await;
    });

    let router = autoscaler_api::build_router(services.api_state());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "API server listening");

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = sync_handle.await;
    let _ = prune_handle.await;

    info!("scaling engine stopped");
    Ok(())
}
