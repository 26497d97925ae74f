#![forbid(unsafe_code)]

//! opsync daemon: serves the local cache registry and keeps the cache in
//! step with the disk and with a fleet peer.

pub mod http;
pub mod scheduler;
pub mod state;
pub mod watch_fleet;
pub mod watch_local;

pub use state::AppState;
pub use watch_fleet::{FleetCycle, FleetWatcher, SkipReason};
pub use watch_local::LocalWatcher;
