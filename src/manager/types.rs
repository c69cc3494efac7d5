use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::poller::Poller;
use crate::remote::types::{RemoteError, RemoteService};
use crate::tasks::registry::Registry;
use crate::tasks::types::ImageFile;

/// Default cadence between status polls for one job.
pub const POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// Ceiling on how long one job may stay in `Running` before it is failed
/// with a `timeout` label.
pub const MAX_POLL_DURATION: Duration = Duration::from_secs(600);

/// The orchestration core: reacts to user intents by driving the remote
/// service and mutating the task registry. Cloning is cheap — clones
/// share the registry, face reference and timer map.
#[derive(Clone)]
pub struct Manager {
    pub registry: Arc<Mutex<Registry>>,
    pub face: Arc<Mutex<Option<Arc<ImageFile>>>>,
    pub remote: Arc<dyn RemoteService>,
    pub poller: Arc<Poller>,
    pub poll_interval: Duration,
    pub max_poll: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("no body images queued")]
    NoTasks,

    #[error("no face image selected")]
    MissingFace,

    #[error("task {0} not found")]
    TaskNotFound(uuid::Uuid),

    #[error("no finished results to download")]
    NothingToDownload,

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("failed to build archive: {0}")]
    Archive(String),
}

pub type ManagerResult<T> = Result<T, ManagerError>;

/// One-shot archive of every result that could be fetched, plus how many
/// artifacts were skipped because their fetch failed.
#[derive(Debug)]
pub struct DownloadBundle {
    pub data: Vec<u8>,
    pub packed: usize,
    pub failed: usize,
}
