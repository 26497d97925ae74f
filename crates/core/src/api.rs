//! Wire types shared by the daemon's HTTP surface and its clients.

use serde::{Deserialize, Serialize};

/// Registry endpoint path served by the daemon.
pub const REGISTRY_PATH: &str = "/v1/registry";

/// `GET /v1/status` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    /// Identifier of the answering daemon.
    pub instance_id: String,
    /// Whether the cache extension is loaded.
    pub available: bool,
    /// Whether caching is switched on.
    pub enabled: bool,
    /// Number of cached scripts.
    pub scripts: usize,
}

/// `POST /v1/compile` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompileRequest {
    /// Recompile every watched file, not only stale or uncached ones.
    #[serde(default)]
    pub force: bool,
}

/// `POST /v1/compile` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileResponse {
    /// Files compiled successfully.
    pub compiled: usize,
    /// Files the engine rejected.
    pub failed: Vec<CompileFailureRow>,
}

/// One rejected file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileFailureRow {
    /// Source path.
    pub path: String,
    /// Compile error reported by the engine.
    pub error: String,
}

/// `POST /v1/reset` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetResponse {
    /// Always true; failures answer with an error body.
    pub ok: bool,
}

/// Error body for non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable cause.
    pub error: String,
}
