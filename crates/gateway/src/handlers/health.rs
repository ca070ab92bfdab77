//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: ReadyChecks,
}

#[derive(Serialize)]
pub struct ReadyChecks {
    pub fragment_store: String,
    pub generator: String,
    pub reasoner: String,
    pub agentic_default: bool,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: lexforge_common::VERSION.to_string(),
    })
}

/// Readiness probe - reports the components wired at startup
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    (
        StatusCode::OK,
        Json(ReadyResponse {
            status: "ready".to_string(),
            checks: ReadyChecks {
                fragment_store: state.components.store.clone(),
                generator: state.components.generator.clone(),
                reasoner: state.components.reasoner.clone(),
                agentic_default: state.config.retrieval.agentic,
            },
        }),
    )
}
