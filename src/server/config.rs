use crate::server::types::ApiError;

/// Default engine API base; override with `ENGINE_API_URL`.
const DEFAULT_ENGINE_API_URL: &str = "https://www.runninghub.cn";

/// Default blob age before cleanup deletes it, in hours.
const DEFAULT_CLEANUP_MAX_AGE_HOURS: i64 = 24;

/// Server configuration loaded from environment variables.
///
/// Upstream credentials stay `Option`al: a missing value fails the routes
/// that need it with a descriptive error instead of failing startup, so
/// the rest of the surface keeps working.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Engine task API base URL.
    pub engine_api_url: String,
    /// Engine API key; required by the status and cancel routes.
    pub engine_api_key: Option<String>,
    /// Relay webhook for the basic multipart trigger.
    pub relay_webhook_url: Option<String>,
    /// Relay webhook for the url-based (pro) trigger.
    pub relay_pro_webhook_url: Option<String>,
    /// Relay webhook for the synchronous swap.
    pub relay_sync_webhook_url: Option<String>,
    /// Blob storage endpoint and credential; required by upload and cleanup.
    pub blob_api_url: Option<String>,
    pub blob_token: Option<String>,
    /// Age at which stored blobs are deleted by cleanup.
    pub cleanup_max_age: chrono::Duration,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let cleanup_hours: i64 = std::env::var("CLEANUP_MAX_AGE_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CLEANUP_MAX_AGE_HOURS);

        ServerConfig {
            host,
            port,
            engine_api_url: std::env::var("ENGINE_API_URL")
                .unwrap_or_else(|_| DEFAULT_ENGINE_API_URL.into()),
            engine_api_key: std::env::var("ENGINE_API_KEY").ok(),
            relay_webhook_url: std::env::var("RELAY_WEBHOOK_URL").ok(),
            relay_pro_webhook_url: std::env::var("RELAY_PRO_WEBHOOK_URL").ok(),
            relay_sync_webhook_url: std::env::var("RELAY_SYNC_WEBHOOK_URL").ok(),
            blob_api_url: std::env::var("BLOB_API_URL").ok(),
            blob_token: std::env::var("BLOB_READ_WRITE_TOKEN").ok(),
            cleanup_max_age: chrono::Duration::hours(cleanup_hours),
        }
    }

    pub fn require_engine_key(&self) -> Result<&str, ApiError> {
        self.engine_api_key
            .as_deref()
            .ok_or_else(|| ApiError::Config("ENGINE_API_KEY is not configured".into()))
    }

    pub fn require_relay_webhook(&self) -> Result<&str, ApiError> {
        self.relay_webhook_url
            .as_deref()
            .ok_or_else(|| ApiError::Config("RELAY_WEBHOOK_URL is not configured".into()))
    }

    pub fn require_relay_pro_webhook(&self) -> Result<&str, ApiError> {
        self.relay_pro_webhook_url
            .as_deref()
            .ok_or_else(|| ApiError::Config("RELAY_PRO_WEBHOOK_URL is not configured".into()))
    }

    pub fn require_relay_sync_webhook(&self) -> Result<&str, ApiError> {
        self.relay_sync_webhook_url
            .as_deref()
            .ok_or_else(|| ApiError::Config("RELAY_SYNC_WEBHOOK_URL is not configured".into()))
    }

    pub fn require_blob_store(&self) -> Result<(&str, &str), ApiError> {
        let url = self
            .blob_api_url
            .as_deref()
            .ok_or_else(|| ApiError::Config("BLOB_API_URL is not configured".into()))?;
        let token = self
            .blob_token
            .as_deref()
            .ok_or_else(|| ApiError::Config("BLOB_READ_WRITE_TOKEN is not configured".into()))?;
        Ok((url, token))
    }
}
