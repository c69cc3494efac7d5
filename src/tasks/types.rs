use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;

/// Lifecycle states of a swap task. `Success`, `Failed` and `Cancelled`
/// are terminal for polling; retry re-enters `Uploading` from any state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum State {
    Waiting,
    Uploading,
    Submitting,
    Running,
    Success,
    Failed,
    Cancelled,
}

/// An image as handed over by the presentation layer. Immutable once
/// attached to a task; retry re-uses the same bytes.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub name: String,
    pub data: Vec<u8>,
}

impl ImageFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        ImageFile {
            name: name.into(),
            data,
        }
    }
}

/// One unit of work for a single body image.
///
/// `remote_job_id` is set once the engine accepts a submission and is
/// superseded on retry. `result_url` is set exactly while the state is
/// `Success`. `label` is a free-text status tag for display, never
/// consulted by the orchestration logic.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: uuid::Uuid,
    pub source: Arc<ImageFile>,
    pub preview: String,
    pub remote_job_id: Option<String>,
    pub state: State,
    pub result_url: Option<String>,
    pub started_at: Option<SystemTime>,
    pub elapsed: Option<Duration>,
    pub label: String,
}

impl Task {
    /// A fresh `Waiting` task for one body image.
    pub fn new(source: ImageFile) -> Self {
        let preview = format!("local://{}", source.name);
        Task {
            id: uuid::Uuid::new_v4(),
            source: Arc::new(source),
            preview,
            remote_job_id: None,
            state: State::Waiting,
            result_url: None,
            started_at: None,
            elapsed: None,
            label: "READY".to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            State::Success | State::Failed | State::Cancelled
        )
    }
}
