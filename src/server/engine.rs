use serde::Deserialize;

use crate::server::types::ApiError;

/// Engine code meaning "the job is executing".
pub const CODE_RUNNING: i64 = 804;
/// Engine code meaning "the job is queued".
pub const CODE_QUEUED: i64 = 813;

/// Raw envelope the engine task API answers with.
#[derive(Debug, Deserialize)]
pub struct EngineReply {
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Engine state collapsed to the tri-state the status route exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    Running,
    Success { file_url: String },
    Failed { msg: String },
}

/// Map an engine reply to the tri-state. Total by construction: code 0 is
/// success (with the artifact at `data[0].fileUrl`), the two in-flight
/// codes are running, every other code — transient or not — is a failure
/// carrying the engine's message. A success without a usable file url is
/// a failure too, never a crash.
pub fn classify(reply: &EngineReply) -> EngineOutcome {
    match reply.code {
        0 => {
            let file_url = reply
                .data
                .as_ref()
                .and_then(|d| d.get(0))
                .and_then(|entry| entry.get("fileUrl"))
                .and_then(|url| url.as_str());
            match file_url {
                Some(url) => EngineOutcome::Success {
                    file_url: url.to_string(),
                },
                None => EngineOutcome::Failed {
                    msg: "engine reported success without a file url".to_string(),
                },
            }
        }
        CODE_RUNNING | CODE_QUEUED => EngineOutcome::Running,
        code => EngineOutcome::Failed {
            msg: reply
                .msg
                .clone()
                .unwrap_or_else(|| format!("engine returned code {code}")),
        },
    }
}

/// Client for the face-swap engine's task API (status and cancel).
#[derive(Debug, Clone)]
pub struct EngineClient {
    client: reqwest::Client,
    base_url: String,
}

impl EngineClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        EngineClient {
            client,
            base_url: base_url.into(),
        }
    }

    /// Ask the engine for a job's outputs and collapse the answer.
    pub async fn outputs(&self, api_key: &str, task_id: &str) -> Result<EngineOutcome, ApiError> {
        let reply = self
            .post_json("/task/openapi/outputs", api_key, task_id)
            .await?;
        let reply: EngineReply = serde_json::from_value(reply)
            .map_err(|e| ApiError::Upstream(format!("engine reply did not parse: {e}")))?;
        Ok(classify(&reply))
    }

    /// Request job cancellation; the raw engine reply is passed through.
    pub async fn cancel(
        &self,
        api_key: &str,
        task_id: &str,
    ) -> Result<serde_json::Value, ApiError> {
        self.post_json("/task/openapi/cancel", api_key, task_id).await
    }

    async fn post_json(
        &self,
        path: &str,
        api_key: &str,
        task_id: &str,
    ) -> Result<serde_json::Value, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "apiKey": api_key, "taskId": task_id }))
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("engine call failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ApiError::Upstream(format!("engine reply unreadable: {e}")))?;

        if !status.is_success() {
            return Err(ApiError::Upstream(format!("engine answered {status}: {body}")));
        }

        serde_json::from_str(&body)
            .map_err(|_| ApiError::Upstream(format!("engine reply was not JSON: {body}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(code: i64, msg: Option<&str>, data: Option<serde_json::Value>) -> EngineReply {
        EngineReply {
            code,
            msg: msg.map(str::to_string),
            data,
        }
    }

    #[test]
    fn code_zero_with_file_url_is_success() {
        let data = serde_json::json!([{ "fileUrl": "https://cdn.engine/out.png" }]);
        assert_eq!(
            classify(&reply(0, None, Some(data))),
            EngineOutcome::Success {
                file_url: "https://cdn.engine/out.png".to_string()
            }
        );
    }

    #[test]
    fn in_flight_codes_are_running() {
        assert_eq!(classify(&reply(CODE_RUNNING, None, None)), EngineOutcome::Running);
        assert_eq!(classify(&reply(CODE_QUEUED, None, None)), EngineOutcome::Running);
    }

    #[test]
    fn every_other_code_is_a_failure_with_the_engine_message() {
        assert_eq!(
            classify(&reply(433, Some("insufficient credit"), None)),
            EngineOutcome::Failed {
                msg: "insufficient credit".to_string()
            }
        );
        match classify(&reply(999, None, None)) {
            EngineOutcome::Failed { msg } => assert!(msg.contains("999")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn success_without_file_url_does_not_crash() {
        for data in [None, Some(serde_json::json!([])), Some(serde_json::json!([{}]))] {
            match classify(&reply(0, None, data)) {
                EngineOutcome::Failed { msg } => assert!(msg.contains("file url")),
                other => panic!("expected failure, got {other:?}"),
            }
        }
    }
}
