use std::future::ready;
use std::sync::Arc;

use axum::{routing::get, Router};
use common_redis::StoreConnection;
use health::HealthSignal;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::api::TaskIds;
use crate::handlers::{probes, tasks};
use crate::metrics_middleware::track_metrics;

#[derive(Clone)]
pub struct AppState {
    pub store: StoreConnection,
    pub health: HealthSignal,
    pub task_ids: Arc<TaskIds>,
}

impl AppState {
    /// Readiness follows the store connection.
    pub fn new(store: StoreConnection, version: impl Into<String>) -> Self {
        let health = HealthSignal::new(version, Arc::new(store.clone()));
        Self {
            store,
            health,
            task_ids: Arc::new(TaskIds::default()),
        }
    }
}

pub fn router(state: AppState, metrics: Option<PrometheusHandle>) -> Router {
    let status_router = Router::new()
        .route("/health", get(probes::health))
        .route("/ready", get(probes::ready))
        .route("/version", get(probes::version));

    let tasks_router = Router::new().route("/tasks", get(tasks::list).post(tasks::create));

    Router::new()
        .route("/", get(index))
        .merge(status_router)
        .merge(tasks_router)
        .route(
            "/metrics",
            get(move || match metrics {
                Some(ref recorder_handle) => ready(recorder_handle.render()),
                None => ready("no metrics recorder installed".to_owned()),
            }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state)
}

pub async fn index() -> &'static str {
    "task-api"
}
