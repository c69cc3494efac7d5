use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::types::{PollOutcome, RemoteError, RemoteResult, RemoteService};
use crate::tasks::types::ImageFile;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `RemoteService` backed by the lunar route server.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct UploadReply {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SubmitReply {
    #[serde(rename = "taskId")]
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusReply {
    pub status: String,
    pub output: Option<String>,
    pub msg: Option<String>,
}

/// Collapse a status reply to the tri-state. Total: any status string the
/// server did not document maps to `Failed` with the raw text attached.
pub fn outcome_from_status(reply: &StatusReply) -> PollOutcome {
    match reply.status.as_str() {
        "RUNNING" => PollOutcome::Running,
        "SUCCESS" => match &reply.output {
            Some(output) => PollOutcome::Success {
                output: output.clone(),
            },
            None => PollOutcome::Failed {
                message: "success reported without an output url".to_string(),
            },
        },
        "FAILED" => PollOutcome::Failed {
            message: reply.msg.clone().unwrap_or_else(|| "FAILED".to_string()),
        },
        other => PollOutcome::Failed {
            message: format!("unrecognized status: {other}"),
        },
    }
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        HttpRemote {
            client,
            base_url: base_url.into(),
        }
    }

    async fn read_body(resp: reqwest::Response) -> RemoteResult<String> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(RemoteError::Request(format!("{status}: {body}")))
        }
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn upload(&self, image: &ImageFile) -> RemoteResult<String> {
        let url = format!("{}/api/upload", self.base_url);

        let resp = self
            .client
            .post(&url)
            .query(&[("filename", image.name.as_str())])
            .body(image.data.clone())
            .send()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;

        let body = Self::read_body(resp).await?;
        let reply: UploadReply =
            serde_json::from_str(&body).map_err(|_| RemoteError::Malformed(body))?;
        Ok(reply.url)
    }

    async fn submit(&self, body_url: &str, face_url: &str) -> RemoteResult<String> {
        let url = format!("{}/api/pro/trigger", self.base_url);

        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "body_url": body_url,
                "face_url": face_url,
            }))
            .send()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;

        let body = Self::read_body(resp).await?;
        let reply: SubmitReply =
            serde_json::from_str(&body).map_err(|_| RemoteError::Malformed(body))?;
        reply.task_id.ok_or(RemoteError::MissingJobId)
    }

    async fn poll(&self, job_id: &str) -> RemoteResult<PollOutcome> {
        let url = format!("{}/api/status", self.base_url);

        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "taskId": job_id }))
            .send()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;

        let body = Self::read_body(resp).await?;
        let reply: StatusReply =
            serde_json::from_str(&body).map_err(|_| RemoteError::Malformed(body))?;
        Ok(outcome_from_status(&reply))
    }

    async fn cancel(&self, job_id: &str) -> RemoteResult<()> {
        let url = format!("{}/api/cancel", self.base_url);

        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "taskId": job_id }))
            .send()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;

        Self::read_body(resp).await.map(|_| ())
    }

    async fn fetch(&self, url: &str) -> RemoteResult<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(RemoteError::Request(format!(
                "failed to fetch artifact {url}: {}",
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(status: &str, output: Option<&str>, msg: Option<&str>) -> StatusReply {
        StatusReply {
            status: status.to_string(),
            output: output.map(str::to_string),
            msg: msg.map(str::to_string),
        }
    }

    #[test]
    fn maps_documented_statuses() {
        assert_eq!(
            outcome_from_status(&reply("RUNNING", None, None)),
            PollOutcome::Running
        );
        assert_eq!(
            outcome_from_status(&reply("SUCCESS", Some("https://cdn/out.png"), None)),
            PollOutcome::Success {
                output: "https://cdn/out.png".to_string()
            }
        );
        assert_eq!(
            outcome_from_status(&reply("FAILED", None, Some("engine unhappy"))),
            PollOutcome::Failed {
                message: "engine unhappy".to_string()
            }
        );
    }

    #[test]
    fn unknown_status_fails_instead_of_hanging() {
        match outcome_from_status(&reply("PAUSED", None, None)) {
            PollOutcome::Failed { message } => assert!(message.contains("PAUSED")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn success_without_output_is_a_failure() {
        match outcome_from_status(&reply("SUCCESS", None, None)) {
            PollOutcome::Failed { message } => assert!(message.contains("output url")),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
