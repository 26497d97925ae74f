#![forbid(unsafe_code)]

//! opsync daemon: serves the registry and runs both cache watchers.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use opsync_core::{config::Config, Engine, MemoryRuntime};
use opsync_daemon::{http, scheduler, AppState};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "opsync-daemon", version, about = "Opcode cache coherence daemon")]
struct Cli {
    /// Application root; relative config paths are resolved against it.
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Config file. Defaults to <project-root>/.opsync/opsync.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `server.listen`, e.g. 127.0.0.1:8089
    #[arg(long)]
    listen: Option<String>,

    /// Identifier reported by /v1/status. Random when unset.
    #[arg(long)]
    instance_id: Option<String>,

    /// Compile the watch set once before serving.
    #[arg(long, default_value_t = false)]
    warm: bool,

    /// Log level (env-filter syntax).
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&cli.log))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let project_root =
        std::fs::canonicalize(&cli.project_root).unwrap_or_else(|_| cli.project_root.clone());
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| Config::default_path(&project_root));
    let mut config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?
        .rooted(&project_root);
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    let engine = Engine::new(Arc::new(MemoryRuntime::new())).context("opcode cache unavailable")?;
    let instance_id = cli
        .instance_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!(%instance_id, config = %config_path.display(), "starting daemon");

    let addr: SocketAddr = config
        .server
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", config.server.listen))?;
    let state = AppState::new(engine, config, instance_id);

    if cli.warm {
        let local = Arc::clone(&state.local);
        let outcome = tokio::task::spawn_blocking(move || local.compile_all(true)).await??;
        info!(compiled = outcome.compiled.len(), failed = outcome.failed.len(), "cache warmed");
    }

    // Background tasks
    if state.config.watch.enabled {
        scheduler::spawn_local_watcher(state.clone());
    }
    if state.config.fleet.enabled {
        scheduler::spawn_fleet_watcher(state.clone())?;
    }

    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown requested");
}
