use std::sync::atomic::{AtomicI64, Ordering};

use axum::async_trait;
use axum::body::Body;
use axum::extract::{rejection::JsonRejection, FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common_redis::CustomRedisError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::error;

/// List holding one JSON document per task, oldest first.
pub const TASKS_KEY: &str = "tasks";

const MAX_BODY_SIZE: usize = 1_000_000;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Database unavailable")]
    DatabaseUnavailable,
    #[error("Description is required")]
    DescriptionRequired,
    #[error("{0}")]
    InvalidBody(String),
    #[error(transparent)]
    Store(#[from] CustomRedisError),
    #[error("invalid task document: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::DatabaseUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::DescriptionRequired | ApiError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            // Losing the connection mid-request is as transient as not having one
            ApiError::Store(err) if err.is_connection_error() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(_) | ApiError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ApiError::Store(err) if err.is_connection_error() => {
                ApiError::DatabaseUnavailable.to_string()
            }
            _ => self.to_string(),
        };
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "task request failed");
        }

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub description: String,
    #[serde(rename = "createdAt", with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// The body of a request made to create a task.
#[derive(Debug, Default, Deserialize)]
pub struct CreateTask {
    #[serde(default)]
    pub description: Option<String>,
}

impl CreateTask {
    /// The description, if it holds anything at all.
    pub fn description(self) -> Result<String, ApiError> {
        match self.description {
            Some(description) if !description.is_empty() => Ok(description),
            _ => Err(ApiError::DescriptionRequired),
        }
    }
}

/// A `POST /tasks` body. Requests without a JSON content type, or without a body at all,
/// read as an empty object so they fail on the missing description like any other.
/// Only bodies that are sent as JSON and fail to parse keep the rejection message.
#[derive(Debug)]
pub struct CreateTaskBody(pub CreateTask);

#[async_trait]
impl<S> FromRequest<S> for CreateTaskBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();
        let bytes = axum::body::to_bytes(body, MAX_BODY_SIZE)
            .await
            .map_err(|err| ApiError::InvalidBody(err.to_string()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(CreateTask::default()));
        }

        let req = Request::from_parts(parts, Body::from(bytes));
        match Json::<CreateTask>::from_request(req, state).await {
            Ok(Json(payload)) => Ok(Self(payload)),
            Err(JsonRejection::MissingJsonContentType(_)) => Ok(Self(CreateTask::default())),
            Err(rejection) => Err(ApiError::InvalidBody(rejection.body_text())),
        }
    }
}

/// Issues task ids: the creation time in milliseconds, bumped when needed so that every
/// id is strictly greater than the previous one handed out by this process.
///
/// Ids are not coordinated between processes: two replicas creating a task in the same
/// millisecond can pick the same id.
#[derive(Debug, Default)]
pub struct TaskIds {
    last: AtomicI64,
}

impl TaskIds {
    pub fn next(&self, created_at: OffsetDateTime) -> i64 {
        let millis = (created_at.unix_timestamp_nanos() / 1_000_000) as i64;
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(millis.max(last + 1))
            });
        match previous {
            Ok(last) | Err(last) => millis.max(last + 1),
        }
    }
}
