use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use opsync_core::api::{
    CompileFailureRow, CompileRequest, CompileResponse, ErrorResponse, ResetResponse,
    StatusResponse, REGISTRY_PATH,
};
use opsync_core::{EngineError, RegistrySnapshot};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/status", get(status))
        .route(REGISTRY_PATH, get(registry))
        .route("/v1/reset", post(reset))
        .route("/v1/compile", post(compile))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(st): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let (enabled, scripts) = match st.engine.status() {
        Ok(snapshot) => (true, snapshot.scripts.len()),
        Err(EngineError::EngineDisabled) => (false, 0),
        Err(e) => return Err(e.into()),
    };
    Ok(Json(StatusResponse {
        instance_id: st.instance_id.clone(),
        available: true,
        enabled,
        scripts,
    }))
}

async fn registry(State(st): State<AppState>) -> Result<Json<RegistrySnapshot>, AppError> {
    Ok(Json(st.engine.status()?.into_registry()))
}

async fn reset(State(st): State<AppState>) -> Result<Json<ResetResponse>, AppError> {
    let _guard = st.cache_lock.lock().await;
    st.engine.reset()?;
    tracing::info!("cache reset over http");
    Ok(Json(ResetResponse { ok: true }))
}

async fn compile(
    State(st): State<AppState>,
    body: Option<Json<CompileRequest>>,
) -> Result<Json<CompileResponse>, AppError> {
    let force = body.map(|Json(req)| req.force).unwrap_or_default();
    let _guard = st.cache_lock.lock().await;
    let local = Arc::clone(&st.local);
    let outcome = tokio::task::spawn_blocking(move || local.compile_all(force))
        .await
        .map_err(|e| AppError::internal(anyhow::anyhow!("compile task panicked: {e}")))??;
    Ok(Json(CompileResponse {
        compiled: outcome.compiled.len(),
        failed: outcome
            .failed
            .into_iter()
            .map(|(path, error)| CompileFailureRow {
                path: path.display().to_string(),
                error,
            })
            .collect(),
    }))
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    fn internal(error: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error,
        }
    }
}

impl From<EngineError> for AppError {
    fn from(value: EngineError) -> Self {
        let status = match value {
            EngineError::ExtensionNotLoaded | EngineError::EngineDisabled => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            error: value.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() && self.status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self.error, "request failed");
        } else {
            tracing::debug!(error = %self.error, status = %self.status, "request refused");
        }
        let body = Json(ErrorResponse {
            error: self.error.to_string(),
        });
        (self.status, body).into_response()
    }
}
