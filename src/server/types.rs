use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Route-layer error type. Implements `IntoResponse` so every handler
/// returns the same JSON error shape.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A required environment value is missing for this route.
    #[error("{0}")]
    Config(String),

    /// The request itself is unusable (missing field, bad payload).
    #[error("{0}")]
    BadRequest(String),

    /// An upstream call failed or returned something unusable.
    #[error("{0}")]
    Upstream(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Config(_) | ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TaskIdRequest {
    #[serde(rename = "taskId")]
    pub task_id: String,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    #[serde(rename = "taskId")]
    pub task_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ProTriggerRequest {
    pub body_url: String,
    pub face_url: String,
}

#[derive(Debug, Serialize)]
pub struct SwapResponse {
    pub results: Vec<String>,
}

/// Body of the status route: the engine's state collapsed to the
/// tri-state the orchestration core polls against.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub msg: String,
    pub deleted: Vec<String>,
}
