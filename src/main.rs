//! `pos-sync-agent`: runs the offline queue drain loop for one terminal
//! until interrupted.

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

use pos_offline_sync::{
    telemetry, GraphqlClient, NetworkMonitor, OfflineQueue, QueueStore, SyncConfig, SyncScheduler,
    SyncSignal,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SyncConfig::from_env().context("loading POS_SYNC_* configuration")?;
    let _log_guard = telemetry::init_logging(&config.log_dir, config.log_json)
        .with_context(|| format!("creating log dir {}", config.log_dir.display()))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        server = %config.server_url,
        terminal_id = config.terminal_id.as_deref(),
        data_dir = %config.data_dir.display(),
        "Starting POS sync agent"
    );

    let store = QueueStore::open(&config.data_dir).context("opening offline queue")?;
    let client = GraphqlClient::new(
        &config.server_url,
        config.api_key.clone(),
        config.terminal_id.clone(),
        config.request_timeout,
    )
    .context("building sync client")?;

    let probe = client.test_connectivity().await;
    if probe.success {
        info!(latency_ms = probe.latency_ms, "Sync server reachable");
    } else {
        warn!(
            error = probe.error.as_deref(),
            "Sync server not reachable at startup; queue will hold transactions"
        );
    }

    let network = NetworkMonitor::with_initial(probe.success, config.debounce);
    let queue = OfflineQueue::new(store, Arc::new(client), network, config.retry.clone())
        .context("starting offline queue")?;

    let _signals = {
        let watched = queue.clone();
        queue.subscribe(move |signal| match signal {
            SyncSignal::SyncFailed => {
                let failed = watched.failed_entries().map(|f| f.len()).unwrap_or(0);
                warn!(failed, "Some queued transactions need attention");
            }
            SyncSignal::LastSyncChanged | SyncSignal::QueueChanged => {}
        })
    };

    info!(
        pending = queue.pending_count().unwrap_or(0),
        "Offline queue ready"
    );

    let scheduler = SyncScheduler::start(queue.clone(), config.scheduler_options());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");

    scheduler.shutdown().await;
    info!(
        pending = queue.pending_count().unwrap_or(0),
        "POS sync agent stopped"
    );
    Ok(())
}
