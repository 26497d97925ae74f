use std::sync::Arc;

use opsync_core::{config::Config, AddressResolver, Engine};
use tokio::sync::Mutex;

use crate::watch_local::LocalWatcher;

/// Shared by the HTTP handlers and both watcher loops.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub resolver: Arc<AddressResolver>,
    pub config: Arc<Config>,
    pub instance_id: String,
    /// Watched file set, also used by `/v1/compile`.
    pub local: Arc<LocalWatcher>,
    /// Held for the whole body of anything that compiles or resets, so
    /// cache mutations in this process never interleave.
    pub cache_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(engine: Engine, config: Config, instance_id: String) -> Self {
        let resolver = Arc::new(AddressResolver::new(config.server.canonical_url.clone()));
        let local = Arc::new(LocalWatcher::from_config(engine.clone(), &config));
        Self {
            engine,
            resolver,
            config: Arc::new(config),
            instance_id,
            local,
            cache_lock: Arc::new(Mutex::new(())),
        }
    }
}
