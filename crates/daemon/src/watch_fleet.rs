//! Fleet registry watcher: pulls a peer's registry snapshot and recompiles
//! whatever the peer has seen change.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use opsync_core::api::REGISTRY_PATH;
use opsync_core::reconcile::{self, CycleReport, ReconcilePlan};
use opsync_core::{AddressResolver, Engine, EngineError, RegistrySnapshot};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::state::AppState;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}")]
    Status {
        url: Url,
        status: reqwest::StatusCode,
    },
    #[error("malformed registry from {url}: {source}")]
    Decode {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
}

/// Why a fleet cycle did nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The poll target is not a usable URL.
    AddressUnresolvable,
    RemoteUnreachable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetCycle {
    Skipped(SkipReason),
    Reconciled(CycleReport),
}

pub struct FleetWatcher {
    engine: Engine,
    resolver: Arc<AddressResolver>,
    client: reqwest::Client,
    target: String,
    use_canonical_host: bool,
    reset_threshold: usize,
}

impl FleetWatcher {
    pub fn new(
        engine: Engine,
        resolver: Arc<AddressResolver>,
        target: impl Into<String>,
        timeout: Duration,
        use_canonical_host: bool,
        reset_threshold: usize,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building registry client")?;
        Ok(Self {
            engine,
            resolver,
            client,
            target: target.into(),
            use_canonical_host,
            reset_threshold,
        })
    }

    /// Polls `fleet.peer_url`, or this process's own registry when unset.
    pub fn from_state(state: &AppState) -> anyhow::Result<Self> {
        let fleet = &state.config.fleet;
        let target = fleet.peer_url.clone().unwrap_or_else(|| {
            format!(
                "{}{}",
                state.config.server.self_url().trim_end_matches('/'),
                REGISTRY_PATH
            )
        });
        Self::new(
            state.engine.clone(),
            state.resolver.clone(),
            target,
            Duration::from_millis(fleet.timeout_ms),
            fleet.use_canonical_host,
            fleet.reset_threshold,
        )
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    async fn fetch(&self, url: Url) -> Result<RegistrySnapshot, FetchError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { url, status });
        }
        resp.json::<RegistrySnapshot>()
            .await
            .map_err(|source| FetchError::Decode { url, source })
    }

    /// One poll. Unreachable or unresolvable peers skip the cycle; only a
    /// local engine that cannot be used is an error.
    pub async fn run_cycle(&self) -> Result<FleetCycle, EngineError> {
        let Some(url) = self.resolver.resolve(&self.target, self.use_canonical_host) else {
            warn!(peer = %self.target, "fleet address unresolvable; skipping cycle");
            return Ok(FleetCycle::Skipped(SkipReason::AddressUnresolvable));
        };

        let remote = match self.fetch(url).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(error = %e, "fleet registry unreachable; skipping cycle");
                return Ok(FleetCycle::Skipped(SkipReason::RemoteUnreachable(e.to_string())));
            }
        };

        let local = self.engine.status()?.into_registry();
        let stale = reconcile::stale_against_registry(&remote, &local);
        debug!(remote = remote.len(), local = local.len(), stale = stale.len(), "registry diffed");

        let plan = ReconcilePlan::new(stale, Vec::new(), self.reset_threshold);
        let report = reconcile::apply(&self.engine, &plan)?;
        if report.stale > 0 {
            info!(
                strategy = ?report.strategy,
                stale = report.stale,
                compiled = report.compiled,
                failed = report.failed.len(),
                "fleet reconcile done"
            );
        }
        Ok(FleetCycle::Reconciled(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsync_core::MemoryRuntime;

    fn watcher(target: &str, canonical: Option<&str>) -> FleetWatcher {
        let engine = Engine::new(Arc::new(MemoryRuntime::new())).unwrap();
        let resolver = Arc::new(AddressResolver::new(canonical.map(str::to_string)));
        FleetWatcher::new(engine, resolver, target, Duration::from_millis(200), true, 25).unwrap()
    }

    #[tokio::test]
    async fn invalid_target_is_unresolvable() {
        let w = watcher("not a url", None);
        assert_eq!(
            w.run_cycle().await.unwrap(),
            FleetCycle::Skipped(SkipReason::AddressUnresolvable)
        );
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let w = watcher(&format!("http://{addr}{REGISTRY_PATH}"), None);
        assert!(matches!(
            w.run_cycle().await.unwrap(),
            FleetCycle::Skipped(SkipReason::RemoteUnreachable(_))
        ));
    }

    #[tokio::test]
    async fn poll_goes_to_canonical_host() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let canonical = format!("http://localhost:{port}");
        let w = watcher("http://10.0.0.1:9/v1/registry", Some(&canonical));
        let FleetCycle::Skipped(SkipReason::RemoteUnreachable(reason)) = w.run_cycle().await.unwrap()
        else {
            panic!("expected an unreachable peer");
        };
        assert!(reason.contains(&format!("localhost:{port}/v1/registry")));
    }
}
