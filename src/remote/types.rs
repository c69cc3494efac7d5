use async_trait::async_trait;

use crate::tasks::types::ImageFile;

/// Tri-state a poll collapses to, whatever the engine reports underneath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Running,
    Success { output: String },
    Failed { message: String },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected response: {0}")]
    Malformed(String),

    #[error("missing-job-id")]
    MissingJobId,
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// The remote side as the orchestrator sees it: blob storage, job
/// submission, status polling, cancellation and artifact retrieval.
///
/// Every operation may fail with a `RemoteError` carrying a displayable
/// message; failures never carry more obligation than that. `cancel` is
/// best-effort — callers ignore its outcome beyond logging.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Store an image, returning a URL later calls can reference.
    async fn upload(&self, image: &ImageFile) -> RemoteResult<String>;

    /// Submit a swap job for an uploaded body/face pair, returning the
    /// remote job id.
    async fn submit(&self, body_url: &str, face_url: &str) -> RemoteResult<String>;

    /// Ask for the current status of a job.
    async fn poll(&self, job_id: &str) -> RemoteResult<PollOutcome>;

    /// Request cancellation of a job.
    async fn cancel(&self, job_id: &str) -> RemoteResult<()>;

    /// Download a result artifact.
    async fn fetch(&self, url: &str) -> RemoteResult<Vec<u8>>;
}
