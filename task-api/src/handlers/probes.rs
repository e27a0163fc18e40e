use axum::{extract::State, Json};
use health::{LivenessReport, Readiness};
use serde::Serialize;

use crate::router::AppState;

#[derive(Serialize)]
pub struct VersionResponse {
    version: String,
}

/// Always answers while the process is up, whatever the store is doing.
pub async fn health(State(state): State<AppState>) -> LivenessReport {
    state.health.liveness_report()
}

pub async fn ready(State(state): State<AppState>) -> Readiness {
    state.health.readiness()
}

pub async fn version(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        version: state.health.version().to_owned(),
    })
}
