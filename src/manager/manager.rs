use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use zip::write::SimpleFileOptions;

use super::poller::Poller;
use super::types::{
    DownloadBundle, Manager, ManagerError, ManagerResult, MAX_POLL_DURATION, POLL_INTERVAL,
};
use crate::remote::types::{PollOutcome, RemoteService};
use crate::tasks::registry::Registry;
use crate::tasks::state::{advance, apply_poll};
use crate::tasks::types::{ImageFile, State, Task};

impl Manager {
    pub fn new(remote: Arc<dyn RemoteService>) -> Self {
        Self::with_timing(remote, POLL_INTERVAL, MAX_POLL_DURATION)
    }

    pub fn with_timing(
        remote: Arc<dyn RemoteService>,
        poll_interval: Duration,
        max_poll: Duration,
    ) -> Self {
        Manager {
            registry: Arc::new(Mutex::new(Registry::new())),
            face: Arc::new(Mutex::new(None)),
            remote,
            poller: Arc::new(Poller::new()),
            poll_interval,
            max_poll,
        }
    }

    /// Replace the shared face reference. Tasks already submitted keep the
    /// face they were submitted with; only future submissions see this one.
    pub async fn set_face(&self, image: ImageFile) {
        *self.face.lock().await = Some(Arc::new(image));
    }

    /// Queue one body image as a new `Waiting` task.
    pub async fn add_source(&self, image: ImageFile) -> uuid::Uuid {
        let task = Task::new(image);
        let id = task.id;
        self.registry.lock().await.add(task);
        tracing::debug!(task = %id, "queued body image");
        id
    }

    /// Snapshot of every task in display order.
    pub async fn tasks(&self) -> Vec<Task> {
        self.registry.lock().await.all().to_vec()
    }

    pub async fn task(&self, id: &uuid::Uuid) -> Option<Task> {
        self.registry.lock().await.get(id).cloned()
    }

    /// `(settled, total)` for the progress display: settled counts every
    /// task in a terminal state.
    pub async fn progress(&self) -> (usize, usize) {
        let registry = self.registry.lock().await;
        let settled = registry.all().iter().filter(|t| t.is_terminal()).count();
        (settled, registry.all().len())
    }

    /// Start every `Waiting` task. The shared face is uploaded exactly once
    /// per invocation, before any task is touched; if that upload fails the
    /// whole batch is aborted. Each task then runs its own pipeline
    /// independently — one task failing never affects its siblings.
    ///
    /// Returns how many pipelines were started.
    pub async fn start_batch(&self) -> ManagerResult<usize> {
        let waiting: Vec<uuid::Uuid> = {
            let registry = self.registry.lock().await;
            if registry.is_empty() {
                return Err(ManagerError::NoTasks);
            }
            registry
                .all()
                .iter()
                .filter(|t| t.state == State::Waiting)
                .map(|t| t.id)
                .collect()
        };

        let face = self
            .face
            .lock()
            .await
            .clone()
            .ok_or(ManagerError::MissingFace)?;

        let face_url = self.remote.upload(&face).await?;
        tracing::info!(tasks = waiting.len(), "batch started");

        for id in &waiting {
            tokio::spawn(self.clone().run_pipeline(*id, face_url.clone()));
        }

        Ok(waiting.len())
    }

    /// Re-run one task from scratch, whatever state it is in. The body and
    /// the current face are both re-uploaded, mirroring a batch start; the
    /// previous result and job id are cleared before resubmission.
    pub async fn retry(&self, id: &uuid::Uuid) -> ManagerResult<()> {
        if self.registry.lock().await.get(id).is_none() {
            return Err(ManagerError::TaskNotFound(*id));
        }

        let face = self
            .face
            .lock()
            .await
            .clone()
            .ok_or(ManagerError::MissingFace)?;

        self.poller.cancel(id);
        let face_url = self.remote.upload(&face).await?;
        tokio::spawn(self.clone().run_pipeline(*id, face_url));
        Ok(())
    }

    /// Stop one task: kill its poll timer, mark it `Cancelled`, then ask
    /// the remote side to cancel as a best-effort side request whose result
    /// does not feed back into local state.
    pub async fn stop(&self, id: &uuid::Uuid) -> ManagerResult<()> {
        self.poller.cancel(id);

        let job_id = self
            .registry
            .lock()
            .await
            .update(id, |task| {
                if advance(task, State::Cancelled, "STOPPED") {
                    task.remote_job_id.clone()
                } else {
                    None
                }
            })
            .ok_or(ManagerError::TaskNotFound(*id))?;

        if let Some(job_id) = job_id {
            let remote = self.remote.clone();
            tokio::spawn(async move {
                if let Err(e) = remote.cancel(&job_id).await {
                    tracing::debug!(job = %job_id, error = %e, "remote cancel ignored");
                }
            });
        }

        Ok(())
    }

    /// Delete one task. Its poll timer is cancelled first so nothing can
    /// mutate a record that no longer exists.
    pub async fn remove(&self, id: &uuid::Uuid) -> ManagerResult<()> {
        self.poller.cancel(id);
        self.registry
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or(ManagerError::TaskNotFound(*id))
    }

    /// Package the results of every task that is `Success` right now into
    /// one zip archive. A fetch that fails skips that entry and is counted
    /// in the bundle; tasks finishing after this snapshot are not included.
    pub async fn download_all(&self) -> ManagerResult<DownloadBundle> {
        let targets: Vec<(String, String)> = {
            let registry = self.registry.lock().await;
            registry
                .all()
                .iter()
                .filter(|t| t.state == State::Success)
                .filter_map(|t| t.result_url.clone().map(|url| (t.source.name.clone(), url)))
                .collect()
        };

        if targets.is_empty() {
            return Err(ManagerError::NothingToDownload);
        }

        let fetches: Vec<_> = targets
            .iter()
            .map(|(_, url)| self.remote.fetch(url))
            .collect();
        let fetched = join_all(fetches).await;

        let mut archive = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        let mut packed = 0usize;
        let mut failed = 0usize;

        for (index, ((name, url), result)) in targets.iter().zip(fetched).enumerate() {
            match result {
                Ok(bytes) => {
                    let entry = format!("swap_{:02}_{}", index + 1, name);
                    archive
                        .start_file(entry, options)
                        .map_err(|e| ManagerError::Archive(e.to_string()))?;
                    archive
                        .write_all(&bytes)
                        .map_err(|e| ManagerError::Archive(e.to_string()))?;
                    packed += 1;
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "skipping artifact");
                    failed += 1;
                }
            }
        }

        if packed == 0 {
            return Err(ManagerError::Archive(format!(
                "all {failed} artifact fetches failed"
            )));
        }

        let cursor = archive
            .finish()
            .map_err(|e| ManagerError::Archive(e.to_string()))?;

        tracing::info!(packed, failed, "download bundle built");
        Ok(DownloadBundle {
            data: cursor.into_inner(),
            packed,
            failed,
        })
    }

    /// Abort every poll timer. Call on teardown.
    pub fn shutdown(&self) {
        self.poller.cancel_all();
    }

    /// One task's pipeline: upload the body, submit the job, go `Running`,
    /// start polling. Each step re-checks the state machine, so a stop or
    /// removal while a call is in flight halts the pipeline at the next
    /// transition instead of clobbering the record.
    async fn run_pipeline(self, id: uuid::Uuid, face_url: String) {
        let source = {
            let registry = self.registry.lock().await;
            match registry.get(&id) {
                Some(task) => task.source.clone(),
                None => return,
            }
        };

        if !self.try_advance(&id, State::Uploading, "UPLOADING").await {
            return;
        }

        let body_url = match self.remote.upload(&source).await {
            Ok(url) => url,
            Err(e) => {
                self.fail_task(&id, &e.to_string()).await;
                return;
            }
        };

        if !self.try_advance(&id, State::Submitting, "SUBMITTING").await {
            return;
        }

        let job_id = match self.remote.submit(&body_url, &face_url).await {
            Ok(job_id) => job_id,
            Err(e) => {
                self.fail_task(&id, &e.to_string()).await;
                return;
            }
        };

        let entered = self
            .registry
            .lock()
            .await
            .update(&id, |task| {
                if advance(task, State::Running, "QUEUED") {
                    task.remote_job_id = Some(job_id.clone());
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);

        if !entered {
            return;
        }

        self.begin_polling(id, job_id);
    }

    /// Spawn the poll timer for one running job. The loop exits — and with
    /// it the timer — on the first terminal application, on any discarded
    /// result (task stopped, removed or already terminal), or when the
    /// maximum poll duration is exceeded.
    fn begin_polling(&self, id: uuid::Uuid, job_id: String) {
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; consume it so the first
            // poll happens one full interval after submission.
            ticker.tick().await;

            let started = tokio::time::Instant::now();
            loop {
                ticker.tick().await;

                if started.elapsed() >= manager.max_poll {
                    manager.fail_task(&id, "timeout").await;
                    break;
                }

                match manager.remote.poll(&job_id).await {
                    Ok(outcome) => {
                        let applied = manager
                            .registry
                            .lock()
                            .await
                            .update(&id, |task| apply_poll(task, &outcome))
                            .unwrap_or(false);

                        if !applied {
                            tracing::debug!(task = %id, "late poll result discarded");
                            break;
                        }
                        if !matches!(outcome, PollOutcome::Running) {
                            break;
                        }
                    }
                    Err(e) => {
                        // Transport hiccup: keep the cadence. The max poll
                        // duration bounds how long this can go on.
                        tracing::warn!(task = %id, error = %e, "poll attempt failed");
                    }
                }
            }
        });

        self.poller.track(id, handle);
    }

    async fn try_advance(&self, id: &uuid::Uuid, to: State, label: &str) -> bool {
        self.registry
            .lock()
            .await
            .update(id, |task| advance(task, to, label))
            .unwrap_or(false)
    }

    async fn fail_task(&self, id: &uuid::Uuid, message: &str) {
        let failed = self
            .registry
            .lock()
            .await
            .update(id, |task| advance(task, State::Failed, message))
            .unwrap_or(false);
        if !failed {
            tracing::debug!(task = %id, "failure discarded, task no longer accepts it");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::remote::types::{RemoteError, RemoteResult};

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum PollMode {
        /// Every poll reports success on the first cycle.
        Succeed,
        /// Every poll reports the job still running.
        RunForever,
    }

    /// Scripted stand-in for the remote side. Records every call so tests
    /// can assert on exactly which remote work happened.
    struct MockRemote {
        poll_mode: PollMode,
        fail_submit_for: Option<String>,
        fail_upload_for: Option<String>,
        fail_fetch_for: Option<String>,
        uploads: std::sync::Mutex<Vec<String>>,
        submits: std::sync::Mutex<Vec<String>>,
        cancels: std::sync::Mutex<Vec<String>>,
        polls: AtomicUsize,
        job_seq: AtomicUsize,
    }

    impl MockRemote {
        fn new(poll_mode: PollMode) -> Self {
            MockRemote {
                poll_mode,
                fail_submit_for: None,
                fail_upload_for: None,
                fail_fetch_for: None,
                uploads: std::sync::Mutex::new(Vec::new()),
                submits: std::sync::Mutex::new(Vec::new()),
                cancels: std::sync::Mutex::new(Vec::new()),
                polls: AtomicUsize::new(0),
                job_seq: AtomicUsize::new(0),
            }
        }

        fn fail_submit_for(mut self, needle: &str) -> Self {
            self.fail_submit_for = Some(needle.to_string());
            self
        }

        fn fail_upload_for(mut self, needle: &str) -> Self {
            self.fail_upload_for = Some(needle.to_string());
            self
        }

        fn fail_fetch_for(mut self, needle: &str) -> Self {
            self.fail_fetch_for = Some(needle.to_string());
            self
        }

        fn uploads(&self) -> Vec<String> {
            self.uploads.lock().unwrap().clone()
        }

        fn submits(&self) -> Vec<String> {
            self.submits.lock().unwrap().clone()
        }

        fn cancels(&self) -> Vec<String> {
            self.cancels.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteService for MockRemote {
        async fn upload(&self, image: &ImageFile) -> RemoteResult<String> {
            if let Some(needle) = &self.fail_upload_for {
                if image.name.contains(needle.as_str()) {
                    return Err(RemoteError::Request("storage rejected upload".into()));
                }
            }
            self.uploads.lock().unwrap().push(image.name.clone());
            Ok(format!("blob://{}", image.name))
        }

        async fn submit(&self, body_url: &str, _face_url: &str) -> RemoteResult<String> {
            if let Some(needle) = &self.fail_submit_for {
                if body_url.contains(needle.as_str()) {
                    return Err(RemoteError::Request("relay rejected submission".into()));
                }
            }
            let n = self.job_seq.fetch_add(1, Ordering::SeqCst) + 1;
            let job_id = format!("job-{n}");
            self.submits.lock().unwrap().push(job_id.clone());
            Ok(job_id)
        }

        async fn poll(&self, job_id: &str) -> RemoteResult<PollOutcome> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            match self.poll_mode {
                PollMode::Succeed => Ok(PollOutcome::Success {
                    output: format!("https://cdn.example/{job_id}.png"),
                }),
                PollMode::RunForever => Ok(PollOutcome::Running),
            }
        }

        async fn cancel(&self, job_id: &str) -> RemoteResult<()> {
            self.cancels.lock().unwrap().push(job_id.to_string());
            Ok(())
        }

        async fn fetch(&self, url: &str) -> RemoteResult<Vec<u8>> {
            if let Some(needle) = &self.fail_fetch_for {
                if url.contains(needle.as_str()) {
                    return Err(RemoteError::Request("artifact gone".into()));
                }
            }
            Ok(url.as_bytes().to_vec())
        }
    }

    fn manager_with(remote: Arc<MockRemote>) -> Manager {
        Manager::with_timing(remote, Duration::from_millis(10), Duration::from_secs(5))
    }

    fn image(name: &str) -> ImageFile {
        ImageFile::new(name, vec![0xFF, 0xD8])
    }

    async fn wait_for<F>(manager: &Manager, pred: F) -> Vec<Task>
    where
        F: Fn(&[Task]) -> bool,
    {
        for _ in 0..400 {
            let tasks = manager.tasks().await;
            if pred(&tasks) {
                return tasks;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for task condition");
    }

    async fn wait_until<F>(pred: F)
    where
        F: Fn() -> bool,
    {
        for _ in 0..400 {
            if pred() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for condition");
    }

    #[tokio::test]
    async fn empty_batch_is_a_validation_error_with_zero_remote_calls() {
        let remote = Arc::new(MockRemote::new(PollMode::Succeed));
        let manager = manager_with(remote.clone());
        manager.set_face(image("face.png")).await;

        assert!(matches!(
            manager.start_batch().await,
            Err(ManagerError::NoTasks)
        ));
        assert!(remote.uploads().is_empty());
    }

    #[tokio::test]
    async fn missing_face_is_a_validation_error_with_zero_remote_calls() {
        let remote = Arc::new(MockRemote::new(PollMode::Succeed));
        let manager = manager_with(remote.clone());
        manager.add_source(image("body.png")).await;

        assert!(matches!(
            manager.start_batch().await,
            Err(ManagerError::MissingFace)
        ));
        assert!(remote.uploads().is_empty());
        assert!(remote.submits().is_empty());
    }

    #[tokio::test]
    async fn batch_survives_one_submit_failure() {
        let remote = Arc::new(MockRemote::new(PollMode::Succeed).fail_submit_for("body2"));
        let manager = manager_with(remote.clone());
        manager.set_face(image("face.png")).await;
        manager.add_source(image("body1.png")).await;
        manager.add_source(image("body2.png")).await;
        manager.add_source(image("body3.png")).await;

        assert_eq!(manager.start_batch().await.unwrap(), 3);

        let tasks = wait_for(&manager, |tasks| tasks.iter().all(|t| t.is_terminal())).await;
        assert_eq!(tasks[0].state, State::Success);
        assert_eq!(tasks[1].state, State::Failed);
        assert_eq!(tasks[2].state, State::Success);

        // resultUrl iff Success, and the shared face went up exactly once.
        for task in &tasks {
            assert_eq!(task.result_url.is_some(), task.state == State::Success);
        }
        let face_uploads = remote
            .uploads()
            .iter()
            .filter(|n| n.as_str() == "face.png")
            .count();
        assert_eq!(face_uploads, 1);

        assert_eq!(manager.progress().await, (3, 3));
        wait_until(|| manager.poller.active_count() == 0).await;
    }

    #[tokio::test]
    async fn upload_failure_fails_only_that_task() {
        let remote = Arc::new(MockRemote::new(PollMode::Succeed).fail_upload_for("body2"));
        let manager = manager_with(remote.clone());
        manager.set_face(image("face.png")).await;
        manager.add_source(image("body1.png")).await;
        manager.add_source(image("body2.png")).await;

        manager.start_batch().await.unwrap();

        let tasks = wait_for(&manager, |tasks| tasks.iter().all(|t| t.is_terminal())).await;
        assert_eq!(tasks[0].state, State::Success);
        assert_eq!(tasks[1].state, State::Failed);
        assert!(tasks[1].label.contains("storage rejected"));
        assert_eq!(tasks[1].remote_job_id, None);
    }

    #[tokio::test]
    async fn stopped_task_discards_a_late_success() {
        let remote = Arc::new(MockRemote::new(PollMode::RunForever));
        let manager = manager_with(remote.clone());
        manager.set_face(image("face.png")).await;
        let id = manager.add_source(image("body.png")).await;

        manager.start_batch().await.unwrap();
        wait_for(&manager, |tasks| tasks[0].state == State::Running).await;

        manager.stop(&id).await.unwrap();
        let task = manager.task(&id).await.unwrap();
        assert_eq!(task.state, State::Cancelled);

        // A success that was already queued when the user stopped must be
        // discarded, not applied.
        let applied = manager
            .registry
            .lock()
            .await
            .update(&id, |t| {
                apply_poll(
                    t,
                    &PollOutcome::Success {
                        output: "https://cdn.example/late.png".to_string(),
                    },
                )
            })
            .unwrap();
        assert!(!applied);

        let task = manager.task(&id).await.unwrap();
        assert_eq!(task.state, State::Cancelled);
        assert_eq!(task.result_url, None);

        // Best-effort remote cancel went out for the job.
        wait_until(|| !remote.cancels().is_empty()).await;
        wait_until(|| manager.poller.active_count() == 0).await;
    }

    #[tokio::test]
    async fn removed_task_never_reappears() {
        let remote = Arc::new(MockRemote::new(PollMode::RunForever));
        let manager = manager_with(remote.clone());
        manager.set_face(image("face.png")).await;
        let id = manager.add_source(image("body.png")).await;

        manager.start_batch().await.unwrap();
        wait_for(&manager, |tasks| tasks[0].state == State::Running).await;

        manager.remove(&id).await.unwrap();

        // A poll resolving after removal finds nothing to touch.
        let applied = manager.registry.lock().await.update(&id, |t| {
            apply_poll(
                t,
                &PollOutcome::Success {
                    output: "https://cdn.example/late.png".to_string(),
                },
            )
        });
        assert_eq!(applied, None);
        assert!(manager.tasks().await.is_empty());
        wait_until(|| manager.poller.active_count() == 0).await;
    }

    #[tokio::test]
    async fn retry_clears_the_old_result_and_supersedes_the_job() {
        let remote = Arc::new(MockRemote::new(PollMode::Succeed));
        let manager = manager_with(remote.clone());
        manager.set_face(image("face.png")).await;
        let id = manager.add_source(image("body.png")).await;

        manager.start_batch().await.unwrap();
        wait_for(&manager, |tasks| tasks[0].state == State::Success).await;
        let first = manager.task(&id).await.unwrap();
        assert_eq!(first.remote_job_id.as_deref(), Some("job-1"));

        manager.retry(&id).await.unwrap();
        let tasks = wait_for(&manager, |tasks| {
            tasks[0].state == State::Success
                && tasks[0].remote_job_id.as_deref() == Some("job-2")
        })
        .await;

        assert_eq!(
            tasks[0].result_url.as_deref(),
            Some("https://cdn.example/job-2.png")
        );
        assert_eq!(remote.submits(), ["job-1", "job-2"]);

        // Face re-uploaded on retry, mirroring the batch start.
        let face_uploads = remote
            .uploads()
            .iter()
            .filter(|n| n.as_str() == "face.png")
            .count();
        assert_eq!(face_uploads, 2);
    }

    #[tokio::test]
    async fn retry_of_unknown_task_is_reported() {
        let remote = Arc::new(MockRemote::new(PollMode::Succeed));
        let manager = manager_with(remote.clone());
        manager.set_face(image("face.png")).await;

        let ghost = uuid::Uuid::new_v4();
        assert!(matches!(
            manager.retry(&ghost).await,
            Err(ManagerError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn polling_stops_after_the_timeout_and_fails_the_task() {
        let remote = Arc::new(MockRemote::new(PollMode::RunForever));
        let manager = Manager::with_timing(
            remote.clone(),
            Duration::from_millis(10),
            Duration::from_millis(40),
        );
        manager.set_face(image("face.png")).await;
        manager.add_source(image("body.png")).await;

        manager.start_batch().await.unwrap();
        let tasks = wait_for(&manager, |tasks| tasks[0].state == State::Failed).await;
        assert_eq!(tasks[0].label, "timeout");
        assert_eq!(tasks[0].result_url, None);

        wait_until(|| manager.poller.active_count() == 0).await;
    }

    #[tokio::test]
    async fn download_packages_only_tasks_successful_at_invocation() {
        let remote = Arc::new(MockRemote::new(PollMode::Succeed));
        let manager = manager_with(remote.clone());
        manager.set_face(image("face.png")).await;
        manager.add_source(image("body1.png")).await;
        manager.add_source(image("body2.png")).await;

        manager.start_batch().await.unwrap();
        wait_for(&manager, |tasks| tasks.iter().all(|t| t.is_terminal())).await;

        // A third task added after the snapshot point stays out.
        manager.add_source(image("body3.png")).await;

        let bundle = manager.download_all().await.unwrap();
        assert_eq!(bundle.packed, 2);
        assert_eq!(bundle.failed, 0);

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bundle.data)).unwrap();
        assert_eq!(archive.len(), 2);
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.iter().any(|n| n.contains("body1.png")));
        assert!(names.iter().any(|n| n.contains("body2.png")));
    }

    #[tokio::test]
    async fn download_skips_artifacts_that_fail_to_fetch() {
        let remote = Arc::new(MockRemote::new(PollMode::Succeed).fail_fetch_for("job-1"));
        let manager = manager_with(remote.clone());
        manager.set_face(image("face.png")).await;
        manager.add_source(image("body1.png")).await;
        manager.add_source(image("body2.png")).await;

        manager.start_batch().await.unwrap();
        wait_for(&manager, |tasks| tasks.iter().all(|t| t.is_terminal())).await;

        let bundle = manager.download_all().await.unwrap();
        assert_eq!(bundle.packed, 1);
        assert_eq!(bundle.failed, 1);
    }

    #[tokio::test]
    async fn download_with_no_successes_is_a_validation_error() {
        let remote = Arc::new(MockRemote::new(PollMode::Succeed));
        let manager = manager_with(remote.clone());
        manager.add_source(image("body.png")).await;

        assert!(matches!(
            manager.download_all().await,
            Err(ManagerError::NothingToDownload)
        ));
    }
}
