use axum::{extract::State, http::StatusCode, Json};
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::api::{ApiError, CreateTaskBody, Task, TASKS_KEY};
use crate::router::AppState;

#[instrument(skip_all)]
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Task>>, ApiError> {
    if !state.store.is_connected() {
        return Err(ApiError::DatabaseUnavailable);
    }

    let documents = state.store.lrange(TASKS_KEY, 0, -1).await?;
    let tasks = documents
        .iter()
        .map(|document| serde_json::from_str::<Task>(document))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(count = tasks.len(), "listed tasks");
    Ok(Json(tasks))
}

#[instrument(skip_all)]
pub async fn create(
    State(state): State<AppState>,
    payload: Result<CreateTaskBody, ApiError>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    // Connectivity first, a client sending a bad body to a store-less replica gets a 503
    if !state.store.is_connected() {
        return Err(ApiError::DatabaseUnavailable);
    }

    let CreateTaskBody(payload) = payload?;
    let description = payload.description()?;

    let created_at = OffsetDateTime::now_utc();
    let task = Task {
        id: state.task_ids.next(created_at),
        description,
        created_at,
    };

    state
        .store
        .rpush(TASKS_KEY, serde_json::to_string(&task)?)
        .await?;

    debug!(id = task.id, "created task");
    Ok((StatusCode::CREATED, Json(task)))
}
