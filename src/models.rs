// src/models.rs

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Opaque identifier of a single download attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The status of a download job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Downloading,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    /// Terminal records no longer hold the target's download slot.
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Downloading)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Downloading => "downloading",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// The tracked state of one download, as stored per target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadJob {
    pub job_id: JobId,
    pub target_id: String,
    pub source_url: String,
    pub temp_path: PathBuf,
    pub final_path: PathBuf,
    pub status: JobStatus,
    pub total_size_bytes: u64,
    pub downloaded_bytes: u64,
    pub progress_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DownloadJob {
    pub fn new(
        job_id: JobId,
        target_id: impl Into<String>,
        source_url: impl Into<String>,
        temp_path: PathBuf,
        final_path: PathBuf,
        total_size_bytes: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            target_id: target_id.into(),
            source_url: source_url.into(),
            temp_path,
            final_path,
            status: JobStatus::Downloading,
            total_size_bytes,
            downloaded_bytes: 0,
            progress_percent: 0.0,
            error_message: None,
            created_at: now,
            expires_at: now,
        }
    }

    /// Applies the fields set in `patch`, leaving every other field untouched.
    pub fn apply(&mut self, patch: &JobPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(total) = patch.total_size_bytes {
            self.total_size_bytes = total;
        }
        if let Some(downloaded) = patch.downloaded_bytes {
            // Progress never goes backwards while the job is live.
            self.downloaded_bytes = self.downloaded_bytes.max(downloaded);
        }
        if let Some(percent) = patch.progress_percent {
            self.progress_percent = self.progress_percent.max(percent);
        }
        if let Some(message) = &patch.error_message {
            self.error_message = Some(message.clone());
        }
    }

    pub(crate) fn touch(&mut self, ttl: Duration) {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX);
        self.expires_at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

/// A partial set of job fields for merge-updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub total_size_bytes: Option<u64>,
    pub downloaded_bytes: Option<u64>,
    pub progress_percent: Option<f64>,
    pub error_message: Option<String>,
}

impl JobPatch {
    /// Progress tick. The percentage is only included when the total is known.
    pub fn progress(total: u64, downloaded: u64) -> Self {
        Self {
            total_size_bytes: (total > 0).then_some(total),
            downloaded_bytes: Some(downloaded),
            progress_percent: progress_percent(total, downloaded),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// `downloaded / total * 100`, rounded to two decimals. `None` while the total is unknown.
pub fn progress_percent(total: u64, downloaded: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    let percent = downloaded as f64 / total as f64 * 100.0;
    Some((percent * 100.0).round() / 100.0)
}
