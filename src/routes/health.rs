use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::config::PipelineMode;
use crate::services::store::JobCounts;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub mode: PipelineMode,
    pub normalizer: NormalizerInfo,
    pub queue_depth: usize,
    pub jobs: JobCounts,
}

#[derive(Serialize)]
pub struct NormalizerInfo {
    pub provider: String,
    pub model: String,
}

/// GET /health: liveness plus queue and job counts.
///
/// Reports `draining` once shutdown has closed the queue.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let accepting = !state.queue.is_closed();
    let status_code = if accepting {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let normalizer = state.pipeline.normalizer();
    let response = HealthResponse {
        status: if accepting { "ok" } else { "draining" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: state.config.pipeline_mode,
        normalizer: NormalizerInfo {
            provider: normalizer.provider_name().to_string(),
            model: normalizer.model().to_string(),
        },
        queue_depth: state.queue.depth(),
        jobs: state.store.counts(),
    };

    (status_code, Json(response))
}
