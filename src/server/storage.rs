use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::server::types::ApiError;

/// Metadata the blob store keeps per object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobMeta {
    pub url: String,
    pub pathname: String,
    #[serde(rename = "uploadedAt")]
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct ListReply {
    blobs: Vec<BlobMeta>,
}

/// Append a short random suffix so repeated uploads of the same filename
/// never collide: `face.png` becomes `face-1a2b3c4d.png`.
pub fn with_random_suffix(filename: &str) -> String {
    let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
    match filename.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}-{suffix}.{ext}"),
        None => format!("{filename}-{suffix}"),
    }
}

/// Urls of every blob uploaded before the cutoff.
pub fn expired_urls(blobs: &[BlobMeta], cutoff: DateTime<Utc>) -> Vec<String> {
    blobs
        .iter()
        .filter(|blob| blob.uploaded_at < cutoff)
        .map(|blob| blob.url.clone())
        .collect()
}

/// Client for the opaque blob store: put a blob and get a public url
/// back, list what is stored, delete by url.
#[derive(Debug, Clone)]
pub struct BlobStore {
    client: reqwest::Client,
}

impl BlobStore {
    pub fn new(client: reqwest::Client) -> Self {
        BlobStore { client }
    }

    pub async fn put(
        &self,
        base_url: &str,
        token: &str,
        filename: &str,
        data: Vec<u8>,
    ) -> Result<BlobMeta, ApiError> {
        let pathname = with_random_suffix(filename);
        let url = format!("{base_url}/{pathname}");

        let resp = self
            .client
            .put(&url)
            .bearer_auth(token)
            .body(data)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("blob upload failed: {e}")))?;

        Self::read_json(resp, "blob store").await
    }

    pub async fn list(&self, base_url: &str, token: &str) -> Result<Vec<BlobMeta>, ApiError> {
        let resp = self
            .client
            .get(base_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("blob list failed: {e}")))?;

        let reply: ListReply = Self::read_json(resp, "blob store").await?;
        Ok(reply.blobs)
    }

    pub async fn delete(
        &self,
        base_url: &str,
        token: &str,
        urls: &[String],
    ) -> Result<(), ApiError> {
        if urls.is_empty() {
            return Ok(());
        }

        let resp = self
            .client
            .post(format!("{base_url}/delete"))
            .bearer_auth(token)
            .json(&serde_json::json!({ "urls": urls }))
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("blob delete failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "blob delete answered {status}: {body}"
            )));
        }
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
        what: &str,
    ) -> Result<T, ApiError> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ApiError::Upstream(format!("{what} reply unreadable: {e}")))?;

        if !status.is_success() {
            return Err(ApiError::Upstream(format!("{what} answered {status}: {body}")));
        }

        serde_json::from_str(&body)
            .map_err(|_| ApiError::Upstream(format!("{what} reply was not JSON: {body}")))
    }
}
