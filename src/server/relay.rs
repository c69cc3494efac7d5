use reqwest::multipart::{Form, Part};

use crate::server::types::ApiError;

/// Pull a job id out of a relay reply. The relay is not consistent about
/// shape: sometimes `{taskId}`, sometimes `{data: {taskId}}`, and the id
/// itself may arrive as a string or a number.
pub fn extract_task_id(value: &serde_json::Value) -> Option<String> {
    let candidate = value
        .get("taskId")
        .or_else(|| value.get("data").and_then(|d| d.get("taskId")))?;

    match candidate {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pull a result url out of a synchronous swap reply, whichever of the
/// known field names the workflow happened to use.
pub fn extract_result_url(value: &serde_json::Value) -> Option<String> {
    ["result", "output", "url", "output_url"]
        .iter()
        .find_map(|key| value.get(key))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Per-submission seed forwarded to the pro workflow. Derived from a v4
/// uuid so the crate does not need a dedicated RNG.
pub fn submission_seed() -> u64 {
    (uuid::Uuid::new_v4().as_u128() % 1_000_000_000) as u64
}

/// One image field of a multipart submission.
pub struct ImagePart {
    pub field: &'static str,
    pub filename: String,
    pub data: Vec<u8>,
}

/// Client for the workflow relay webhooks.
#[derive(Debug, Clone)]
pub struct RelayClient {
    client: reqwest::Client,
}

impl RelayClient {
    pub fn new(client: reqwest::Client) -> Self {
        RelayClient { client }
    }

    /// Forward a body/face pair to the basic webhook and return the job id
    /// the workflow created.
    pub async fn trigger_basic(
        &self,
        webhook_url: &str,
        images: Vec<ImagePart>,
    ) -> Result<String, ApiError> {
        let reply = self.post_multipart(webhook_url, images).await?;
        extract_task_id(&reply).ok_or_else(|| {
            ApiError::Upstream(format!("relay returned no taskId: {reply}"))
        })
    }

    /// Submit already-uploaded blob urls to the pro webhook and return the
    /// job id.
    pub async fn trigger_pro(
        &self,
        webhook_url: &str,
        body_url: &str,
        face_url: &str,
    ) -> Result<String, ApiError> {
        let payload = serde_json::json!({
            "body_url": body_url,
            "face_url": face_url,
            "seed": submission_seed(),
        });

        let resp = self
            .client
            .post(webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("relay call failed: {e}")))?;

        let reply = Self::read_json(resp).await?;
        extract_task_id(&reply).ok_or_else(|| {
            ApiError::Upstream(format!("relay returned no taskId: {reply}"))
        })
    }

    /// Run the whole swap through the synchronous webhook, returning the
    /// finished result url.
    pub async fn swap_sync(
        &self,
        webhook_url: &str,
        images: Vec<ImagePart>,
    ) -> Result<String, ApiError> {
        let reply = self.post_multipart(webhook_url, images).await?;
        extract_result_url(&reply).ok_or_else(|| {
            ApiError::Upstream("relay finished but returned no result url".to_string())
        })
    }

    async fn post_multipart(
        &self,
        webhook_url: &str,
        images: Vec<ImagePart>,
    ) -> Result<serde_json::Value, ApiError> {
        let mut form = Form::new();
        for image in images {
            form = form.part(image.field, Part::bytes(image.data).file_name(image.filename));
        }

        let resp = self
            .client
            .post(webhook_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("relay call failed: {e}")))?;

        Self::read_json(resp).await
    }

    async fn read_json(resp: reqwest::Response) -> Result<serde_json::Value, ApiError> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ApiError::Upstream(format!("relay reply unreadable: {e}")))?;

        if !status.is_success() {
            return Err(ApiError::Upstream(format!("relay answered {status}: {body}")));
        }
        if body.is_empty() {
            return Err(ApiError::Upstream(
                "relay returned an empty reply; check the workflow's respond node".to_string(),
            ));
        }

        serde_json::from_str(&body).map_err(|_| {
            ApiError::Upstream(format!("relay reply was not JSON: {body}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_is_found_in_both_documented_shapes() {
        let flat = serde_json::json!({ "taskId": "abc-123" });
        assert_eq!(extract_task_id(&flat).as_deref(), Some("abc-123"));

        let nested = serde_json::json!({ "data": { "taskId": "xyz-789" } });
        assert_eq!(extract_task_id(&nested).as_deref(), Some("xyz-789"));
    }

    #[test]
    fn numeric_task_ids_are_accepted() {
        let numeric = serde_json::json!({ "taskId": 42 });
        assert_eq!(extract_task_id(&numeric).as_deref(), Some("42"));
    }

    #[test]
    fn absent_or_empty_task_id_is_none() {
        assert_eq!(extract_task_id(&serde_json::json!({})), None);
        assert_eq!(extract_task_id(&serde_json::json!({ "taskId": "" })), None);
        assert_eq!(
            extract_task_id(&serde_json::json!({ "data": { "id": "nope" } })),
            None
        );
    }

    #[test]
    fn result_url_tolerates_every_known_field_name() {
        for key in ["result", "output", "url", "output_url"] {
            let reply = serde_json::json!({ key: "https://cdn/final.png" });
            assert_eq!(
                extract_result_url(&reply).as_deref(),
                Some("https://cdn/final.png")
            );
        }
        assert_eq!(extract_result_url(&serde_json::json!({})), None);
    }

    #[test]
    fn seeds_stay_below_a_billion() {
        for _ in 0..64 {
            assert!(submission_seed() < 1_000_000_000);
        }
    }
}
