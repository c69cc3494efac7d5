use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;

use crate::server::config::ServerConfig;
use crate::server::engine::{EngineClient, EngineOutcome};
use crate::server::relay::{ImagePart, RelayClient};
use crate::server::storage::{expired_urls, BlobMeta, BlobStore};
use crate::server::types::{
    ApiError, ApiResult, CleanupResponse, ProTriggerRequest, StatusResponse, SwapResponse,
    TaskIdRequest, TriggerResponse, UploadQuery,
};

/// Uploads are buffered in memory before they go to the blob store.
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Shared state for every route: configuration plus the upstream clients,
/// all cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub engine: EngineClient,
    pub relay: RelayClient,
    pub storage: BlobStore,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        let engine = EngineClient::new(client.clone(), config.engine_api_url.clone());
        AppState {
            config: Arc::new(config),
            engine,
            relay: RelayClient::new(client.clone()),
            storage: BlobStore::new(client),
        }
    }
}

/// The pass-through route server.
pub struct ApiServer {
    pub state: AppState,
}

impl ApiServer {
    pub fn new(config: ServerConfig) -> Self {
        ApiServer {
            state: AppState::new(config),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/upload", post(upload))
            .route("/api/trigger", post(trigger))
            .route("/api/pro/trigger", post(pro_trigger))
            .route("/api/swap", post(swap))
            .route("/api/status", post(status))
            .route("/api/cancel", post(cancel))
            .route("/api/cleanup", get(cleanup))
            .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
            .with_state(self.state.clone())
    }

    pub async fn start_server(self) -> std::io::Result<()> {
        let address = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = TcpListener::bind(&address).await?;
        tracing::info!(%address, "listening");
        axum::serve(listener, self.router()).await
    }
}

/// POST /api/upload?filename=...
///
/// Raw request body straight into the blob store; replies with the blob
/// metadata, url included.
async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: axum::body::Bytes,
) -> ApiResult<Json<BlobMeta>> {
    let (base_url, token) = state.config.require_blob_store()?;
    let filename = query.filename.unwrap_or_else(|| "file".to_string());

    let blob = state
        .storage
        .put(base_url, token, &filename, body.to_vec())
        .await?;

    tracing::debug!(pathname = %blob.pathname, "blob stored");
    Ok(Json(blob))
}

/// POST /api/trigger — multipart `body_image` + `face_image`, forwarded to
/// the basic relay webhook; replies with the job id to poll.
async fn trigger(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<TriggerResponse>> {
    let webhook = state.config.require_relay_webhook()?.to_string();
    let images = read_image_fields(multipart).await?;

    let task_id = state.relay.trigger_basic(&webhook, images).await?;
    tracing::info!(%task_id, "swap job submitted");
    Ok(Json(TriggerResponse { task_id }))
}

/// POST /api/pro/trigger — blob urls in, job id out.
async fn pro_trigger(
    State(state): State<AppState>,
    Json(req): Json<ProTriggerRequest>,
) -> ApiResult<Json<TriggerResponse>> {
    if req.body_url.is_empty() || req.face_url.is_empty() {
        return Err(ApiError::BadRequest("missing image urls".to_string()));
    }

    let webhook = state.config.require_relay_pro_webhook()?.to_string();
    let task_id = state
        .relay
        .trigger_pro(&webhook, &req.body_url, &req.face_url)
        .await?;

    tracing::info!(%task_id, "swap job submitted");
    Ok(Json(TriggerResponse { task_id }))
}

/// POST /api/swap — the synchronous path: the relay runs the whole swap
/// before answering, so the reply already carries the result url.
async fn swap(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<SwapResponse>> {
    let webhook = state.config.require_relay_sync_webhook()?.to_string();
    let images = read_image_fields(multipart).await?;

    let result_url = state.relay.swap_sync(&webhook, images).await?;
    Ok(Json(SwapResponse {
        results: vec![result_url],
    }))
}

/// POST /api/status — collapse the engine's job state to the tri-state
/// the orchestration core polls against.
async fn status(
    State(state): State<AppState>,
    Json(req): Json<TaskIdRequest>,
) -> ApiResult<Json<StatusResponse>> {
    if req.task_id.is_empty() {
        return Err(ApiError::BadRequest("missing taskId".to_string()));
    }
    let api_key = state.config.require_engine_key()?;

    let response = match state.engine.outputs(api_key, &req.task_id).await? {
        EngineOutcome::Running => StatusResponse {
            status: "RUNNING",
            output: None,
            msg: None,
        },
        EngineOutcome::Success { file_url } => StatusResponse {
            status: "SUCCESS",
            output: Some(file_url),
            msg: None,
        },
        EngineOutcome::Failed { msg } => StatusResponse {
            status: "FAILED",
            output: None,
            msg: Some(msg),
        },
    };

    Ok(Json(response))
}

/// POST /api/cancel — the engine's reply is passed through untouched.
async fn cancel(
    State(state): State<AppState>,
    Json(req): Json<TaskIdRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if req.task_id.is_empty() {
        return Err(ApiError::BadRequest("missing taskId".to_string()));
    }
    let api_key = state.config.require_engine_key()?;

    tracing::info!(task_id = %req.task_id, "cancel requested");
    let reply = state.engine.cancel(api_key, &req.task_id).await?;
    Ok(Json(reply))
}

/// GET /api/cleanup — delete every stored blob older than the configured
/// age and report what went.
async fn cleanup(State(state): State<AppState>) -> ApiResult<Json<CleanupResponse>> {
    let (base_url, token) = state.config.require_blob_store()?;

    let blobs = state.storage.list(base_url, token).await?;
    let cutoff = chrono::Utc::now() - state.config.cleanup_max_age;
    let expired = expired_urls(&blobs, cutoff);

    if expired.is_empty() {
        return Ok(Json(CleanupResponse {
            msg: "no expired files to delete".to_string(),
            deleted: Vec::new(),
        }));
    }

    state.storage.delete(base_url, token, &expired).await?;
    tracing::info!(count = expired.len(), "expired blobs deleted");

    Ok(Json(CleanupResponse {
        msg: format!("deleted {} expired files", expired.len()),
        deleted: expired,
    }))
}

/// Collect the two image fields of a swap submission. Both must be
/// present; anything else in the form is ignored.
async fn read_image_fields(mut multipart: Multipart) -> ApiResult<Vec<ImagePart>> {
    let mut body_image: Option<ImagePart> = None;
    let mut face_image: Option<ImagePart> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("unreadable multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name != "body_image" && name != "face_image" {
            continue;
        }

        let filename = field.file_name().unwrap_or("image").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("unreadable multipart field: {e}")))?
            .to_vec();

        let part = ImagePart {
            field: if name == "body_image" {
                "body_image"
            } else {
                "face_image"
            },
            filename,
            data,
        };

        if name == "body_image" {
            body_image = Some(part);
        } else {
            face_image = Some(part);
        }
    }

    match (body_image, face_image) {
        (Some(body), Some(face)) => Ok(vec![body, face]),
        _ => Err(ApiError::BadRequest(
            "both body_image and face_image are required".to_string(),
        )),
    }
}
