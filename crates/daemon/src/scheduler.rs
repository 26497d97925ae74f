use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::state::AppState;
use crate::watch_fleet::FleetWatcher;

fn ticker(secs: u64) -> tokio::time::Interval {
    let mut tick = interval(Duration::from_secs(secs.max(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tick
}

pub fn spawn_local_watcher(state: AppState) -> JoinHandle<()> {
    info!(
        interval_secs = state.config.watch.interval_secs,
        roots = state.local.roots().len(),
        "local watcher scheduled"
    );
    tokio::spawn(async move {
        let mut tick = ticker(state.config.watch.interval_secs);
        loop {
            tick.tick().await;
            if let Err(e) = local_tick(&state).await {
                warn!("local watcher tick error: {e:#}");
            }
        }
    })
}

async fn local_tick(state: &AppState) -> Result<()> {
    let _guard = state.cache_lock.lock().await;
    let local = Arc::clone(&state.local);
    tokio::task::spawn_blocking(move || local.run_cycle())
        .await
        .context("local watcher task panicked")??;
    Ok(())
}

pub fn spawn_fleet_watcher(state: AppState) -> Result<JoinHandle<()>> {
    let watcher = FleetWatcher::from_state(&state)?;
    info!(
        peer = watcher.target(),
        interval_secs = state.config.fleet.interval_secs,
        "fleet watcher scheduled"
    );
    Ok(tokio::spawn(async move {
        let mut tick = ticker(state.config.fleet.interval_secs);
        loop {
            tick.tick().await;
            let _guard = state.cache_lock.lock().await;
            if let Err(e) = watcher.run_cycle().await {
                warn!("fleet watcher tick error: {e}");
            }
        }
    }))
}
