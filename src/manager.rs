// src/manager.rs

use crate::config::{FetchConfig, StateBackend};
use crate::downloader::{TransferEngine, TransferSummary};
use crate::error::JobError;
use crate::finalize::finalize;
use crate::fs::{delete_best_effort, file_name_from_url, LocalFilesystem, TargetFilesystem};
use crate::models::{DownloadJob, JobId, JobPatch, JobStatus};
use crate::probe::{ProbeResult, SizeProbe};
use crate::state_manager::{
    JobStateStore, KeyValueStore, MemoryStore, SqliteStore, StateError, TargetSlot,
};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("state manager error: {0}")]
    State(#[from] StateError),
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// What `start` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedJob {
    pub job_id: JobId,
    /// Size reported by the probe, 0 if unknown.
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct ProgressTick {
    total: u64,
    downloaded: u64,
}

/// The background task of a target's latest job.
///
/// Kept after the task ends so `join` can still report how it ended, until the
/// next `start` for the target replaces it.
struct ActiveTransfer {
    job_id: JobId,
    cancel: CancellationToken,
    /// `None` while running, the terminal status once finished. Closed without a
    /// value if the task panicked or was dropped.
    done: watch::Receiver<Option<JobStatus>>,
}

impl ActiveTransfer {
    fn is_running(&self) -> bool {
        self.done.borrow().is_none() && !self.cancel.is_cancelled()
    }
}

/// Waits until the task behind `done` has published its status.
async fn wait_done(mut done: watch::Receiver<Option<JobStatus>>) -> Option<JobStatus> {
    let status = match done.wait_for(Option::is_some).await {
        Ok(status) => *status,
        Err(_) => None,
    };
    status
}

/// Runs at most one download per target and tracks it in the job state store.
///
/// Lock order: the target's store slot, then `active`.
pub struct DownloadManager {
    store: JobStateStore,
    fs: Arc<dyn TargetFilesystem>,
    probe: SizeProbe,
    engine: TransferEngine,
    active: Mutex<HashMap<String, ActiveTransfer>>,
}

impl DownloadManager {
    pub fn new(
        store: JobStateStore,
        fs: Arc<dyn TargetFilesystem>,
        client: Client,
        probe_timeout: Duration,
        max_size_bytes: u64,
    ) -> Self {
        Self {
            store,
            probe: SizeProbe::new(client.clone(), probe_timeout, max_size_bytes),
            engine: TransferEngine::new(client, fs.clone(), max_size_bytes),
            fs,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Builds the HTTP client, filesystem and state backend described by `config`.
    pub async fn from_config(config: &FetchConfig) -> Result<Self, ManagerError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout())
            .build()?;

        let kv: Arc<dyn KeyValueStore> = match &config.state {
            StateBackend::Memory => Arc::new(MemoryStore::new()),
            StateBackend::Sqlite { path } => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Arc::new(SqliteStore::open(path).await?)
            }
        };
        let store = JobStateStore::new(kv, config.ttls());
        let fs = Arc::new(LocalFilesystem::new(
            config.targets_root.clone(),
            config.scratch_dir.clone(),
        ));

        Ok(Self::new(
            store,
            fs,
            client,
            config.probe_timeout(),
            config.max_size_bytes,
        ))
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.probe.max_size_bytes()
    }

    /// Probes `url` without touching any job state.
    pub async fn validate(&self, target_id: &str, url: &str) -> Result<ProbeResult, JobError> {
        let source = parse_source_url(url)?;
        match self.probe.probe(&source).await {
            Ok(result) => {
                tracing::info!(
                    target_id = target_id,
                    url = %source,
                    size = result.size_bytes,
                    "validated download url"
                );
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(target_id = target_id, url = %source, error = %e, "url validation failed");
                Err(e)
            }
        }
    }

    /// Registers a new job for `target_id` and starts it in the background.
    ///
    /// Returns as soon as the job record is stored; the transfer outlives this call.
    /// A failed probe does not stop the job: the size is treated as unknown and the
    /// GET decides.
    pub async fn start(self: &Arc<Self>, target_id: &str, url: &str) -> Result<StartedJob, JobError> {
        let source = parse_source_url(url)?;
        let file_name = file_name_from_url(&source)
            .ok_or_else(|| JobError::InvalidUrl(format!("{source} does not name a file")))?;

        // Cheap rejection before any network round-trip; re-checked below.
        self.ensure_idle(&self.store.lock(target_id).await, target_id).await?;

        let size_bytes = match self.probe.probe(&source).await {
            Ok(probed) if probed.exceeds_cap() => {
                tracing::warn!(
                    target_id = target_id,
                    url = %source,
                    size = probed.size_bytes,
                    max = probed.max_size_bytes,
                    "refusing oversized download"
                );
                return Err(JobError::SizeExceeded {
                    actual: probed.size_bytes,
                    max: probed.max_size_bytes,
                });
            }
            Ok(probed) => probed.size_bytes,
            Err(e) => {
                tracing::warn!(target_id = target_id, url = %source, error = %e, "size probe failed, size unknown");
                0
            }
        };
        let final_path = self.fs.path_for(target_id, &file_name);

        let mut slot = self.store.lock(target_id).await;
        self.ensure_idle(&slot, target_id).await?;
        if self.fs.exists(&final_path).await {
            return Err(JobError::DestinationConflict(final_path.display().to_string()));
        }

        let job_id = JobId::generate();
        let temp_path = self.fs.scratch_path(&format!("{job_id}.tmp"));
        let job = DownloadJob::new(
            job_id.clone(),
            target_id,
            source.as_str(),
            temp_path,
            final_path,
            size_bytes,
        );
        slot.put(job.clone()).await?;

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        tokio::spawn(self.clone().run_job(job, source, cancel.clone(), done_tx));
        let previous = self.active.lock().await.insert(
            target_id.to_string(),
            ActiveTransfer {
                job_id: job_id.clone(),
                cancel,
                done: done_rx,
            },
        );
        if let Some(orphan) = previous.filter(ActiveTransfer::is_running) {
            // Its record expired while it was still running; nobody can poll or cancel it.
            tracing::warn!(target_id = target_id, job_id = %orphan.job_id, "stopping untracked transfer");
            orphan.cancel.cancel();
        }
        drop(slot);

        tracing::info!(target_id = target_id, job_id = %job_id, size = size_bytes, "download started");
        Ok(StartedJob { job_id, size_bytes })
    }

    /// Fails with `Conflict` while the target has a non-terminal record.
    async fn ensure_idle(&self, slot: &TargetSlot<'_>, target_id: &str) -> Result<(), JobError> {
        match slot.get().await? {
            Some(existing) if !existing.status.is_terminal() => {
                tracing::info!(
                    target_id = target_id,
                    job_id = %existing.job_id,
                    "download already in progress"
                );
                Err(JobError::Conflict)
            }
            _ => Ok(()),
        }
    }

    /// The target's current record, whatever job it belongs to.
    ///
    /// A record with a different `job_id` means the caller's job is no longer tracked.
    pub async fn progress(
        &self,
        target_id: &str,
        job_id: &JobId,
    ) -> Result<Option<DownloadJob>, JobError> {
        let job = self.store.get(target_id).await?;
        if let Some(current) = &job {
            if current.job_id != *job_id {
                tracing::debug!(
                    target_id = target_id,
                    asked = %job_id,
                    current = %current.job_id,
                    "progress poll for a job that is no longer tracked"
                );
            }
        }
        Ok(job)
    }

    /// Stops `job_id` if it is the target's current job. Anything else is a no-op.
    ///
    /// Waits for the background task to wind down, so the temp file is gone on return.
    pub async fn cancel(&self, target_id: &str, job_id: &JobId) {
        let done = {
            let mut slot = self.store.lock(target_id).await;
            let current = match slot.get().await {
                Ok(current) => current,
                Err(e) => {
                    tracing::error!(target_id = target_id, error = %e, "could not read job state for cancel");
                    None
                }
            };

            let done = match self.active.lock().await.get(target_id) {
                Some(t) if t.job_id == *job_id => {
                    t.cancel.cancel();
                    Some(t.done.clone())
                }
                _ => None,
            };

            match current {
                Some(job) if job.job_id == *job_id => {
                    delete_best_effort(self.fs.as_ref(), &job.temp_path).await;
                    if let Err(e) = slot.delete().await {
                        tracing::error!(target_id = target_id, job_id = %job_id, error = %e, "could not clear cancelled job");
                    }
                    tracing::info!(target_id = target_id, job_id = %job_id, "download cancelled");
                }
                _ => tracing::debug!(target_id = target_id, job_id = %job_id, "cancel ignored, job not current"),
            }

            done
        };

        if let Some(done) = done {
            wait_done(done).await;
        }
    }

    /// Waits for the target's latest job and returns how it ended.
    ///
    /// The status stays available after the job finishes, until the next `start` for
    /// the target. `None` if the target never ran a job here, or its task died
    /// without reporting.
    pub async fn join(&self, target_id: &str) -> Option<JobStatus> {
        let done = self.active.lock().await.get(target_id).map(|t| t.done.clone())?;
        let status = wait_done(done).await;
        if status.is_none() {
            tracing::error!(target_id = target_id, "download task ended without a status");
        }
        status
    }

    /// Cancels every running job and waits for all of them.
    pub async fn shutdown(&self) {
        let transfers: Vec<_> = self.active.lock().await.drain().collect();
        for (_, t) in &transfers {
            t.cancel.cancel();
        }
        for (target_id, t) in transfers {
            wait_done(t.done).await;
            tracing::debug!(target_id = %target_id, job_id = %t.job_id, "stopped on shutdown");
        }
    }

    async fn run_job(
        self: Arc<Self>,
        job: DownloadJob,
        source: Url,
        cancel: CancellationToken,
        done: watch::Sender<Option<JobStatus>>,
    ) {
        let (progress_tx, progress_rx) = watch::channel(ProgressTick::default());
        let reporter = tokio::spawn(report_progress(
            self.store.clone(),
            job.target_id.clone(),
            job.job_id.clone(),
            progress_rx,
        ));

        let result = self
            .engine
            .download(&source, &job.temp_path, job.total_size_bytes, &cancel, |total, downloaded| {
                progress_tx.send_replace(ProgressTick { total, downloaded });
            })
            .await;
        drop(progress_tx);
        let _ = reporter.await;

        self.finish_job(&job, result, &cancel, &done).await;
    }

    /// Moves the job to its terminal state while holding the target's slot, so a
    /// concurrent `cancel` either sees the job finished or stops it before finalizing.
    /// The outcome is published on `done`.
    async fn finish_job(
        &self,
        job: &DownloadJob,
        result: Result<TransferSummary, JobError>,
        cancel: &CancellationToken,
        done: &watch::Sender<Option<JobStatus>>,
    ) {
        let mut slot = self.store.lock(&job.target_id).await;

        let outcome = match result {
            Ok(_) if cancel.is_cancelled() => {
                delete_best_effort(self.fs.as_ref(), &job.temp_path).await;
                Err(JobError::Cancelled)
            }
            Ok(summary) => match finalize(self.fs.as_ref(), &job.temp_path, &job.final_path).await {
                Ok(()) => Ok(summary),
                Err(e) => {
                    delete_best_effort(self.fs.as_ref(), &job.temp_path).await;
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };

        let status = match outcome {
            Ok(summary) => {
                if let Err(e) = slot.delete_job(&job.job_id).await {
                    tracing::error!(target_id = %job.target_id, job_id = %job.job_id, error = %e, "could not clear finished job");
                }
                tracing::info!(
                    target_id = %job.target_id,
                    job_id = %job.job_id,
                    bytes = summary.downloaded_bytes,
                    "download completed"
                );
                JobStatus::Completed
            }
            Err(JobError::Cancelled) => {
                if let Err(e) = slot.delete_job(&job.job_id).await {
                    tracing::error!(target_id = %job.target_id, job_id = %job.job_id, error = %e, "could not clear cancelled job");
                }
                tracing::info!(target_id = %job.target_id, job_id = %job.job_id, "transfer stopped after cancel");
                JobStatus::Cancelled
            }
            Err(e) => {
                tracing::warn!(
                    target_id = %job.target_id,
                    job_id = %job.job_id,
                    kind = e.kind(),
                    error = %e,
                    "download failed"
                );
                if let Err(store_err) = slot.update_job(&job.job_id, &JobPatch::failed(e.to_string())).await {
                    tracing::error!(target_id = %job.target_id, job_id = %job.job_id, error = %store_err, "could not record failure");
                }
                JobStatus::Error
            }
        };
        // Published before the slot is released, so a `start` that gets the slot next
        // sees this task as finished.
        done.send_replace(Some(status));
    }
}

/// Merges progress ticks into the job record until the sender goes away.
async fn report_progress(
    store: JobStateStore,
    target_id: String,
    job_id: JobId,
    mut rx: watch::Receiver<ProgressTick>,
) {
    while rx.changed().await.is_ok() {
        let tick = *rx.borrow_and_update();
        match store
            .update_job(&target_id, &job_id, &JobPatch::progress(tick.total, tick.downloaded))
            .await
        {
            Ok(true) => {}
            // Record gone: cancelled, or expired.
            Ok(false) => break,
            Err(e) => tracing::warn!(target_id = %target_id, job_id = %job_id, error = %e, "progress update failed"),
        }
    }
}

/// Accepts absolute `http`/`https` URLs only.
pub fn parse_source_url(url: &str) -> Result<Url, JobError> {
    let parsed = Url::parse(url.trim()).map_err(|e| JobError::InvalidUrl(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host().is_some() => Ok(parsed),
        "http" | "https" => Err(JobError::InvalidUrl(format!("{url}: missing host"))),
        other => Err(JobError::InvalidUrl(format!("unsupported scheme {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https() {
        assert!(parse_source_url("https://example.com/a.zip").is_ok());
        assert!(parse_source_url(" http://127.0.0.1:8080/x ").is_ok());
    }

    #[test]
    fn rejects_other_urls() {
        for bad in ["", "not a url", "ftp://example.com/a.zip", "file:///etc/passwd", "/relative/path"] {
            let err = parse_source_url(bad).unwrap_err();
            assert!(matches!(err, JobError::InvalidUrl(_)), "{bad} should be invalid");
        }
    }
}
