//! Request/response shapes for the host's web layer.
//!
//! Each handler returns a status code and a JSON body; routing, auth and
//! request parsing stay with the host.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::JobError;
use crate::manager::DownloadManager;
use crate::models::{DownloadJob, JobId, JobStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRequest {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub size: u64,
    pub max_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    pub job_id: JobId,
    pub size: u64,
}

/// A job snapshot for pollers. Serializes to `{}` when no job is tracked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&DownloadJob> for ProgressResponse {
    fn from(job: &DownloadJob) -> Self {
        Self {
            job_id: Some(job.job_id.clone()),
            progress: Some(job.progress_percent),
            total_size: Some(job.total_size_bytes),
            downloaded: Some(job.downloaded_bytes),
            status: Some(job.status),
            error: job.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error kind, e.g. `conflict`.
    pub error: String,
    pub message: String,
}

impl From<&JobError> for ErrorResponse {
    fn from(e: &JobError) -> Self {
        Self {
            error: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn ok<T: Serialize>(body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status: 200, body },
            Err(e) => Self {
                status: 500,
                body: json!({ "error": "serialization_error", "message": e.to_string() }),
            },
        }
    }

    fn error(e: &JobError) -> Self {
        let body = ErrorResponse::from(e);
        Self {
            status: e.status_code(),
            body: json!({ "error": body.error, "message": body.message }),
        }
    }
}

/// `POST validate {url}`
pub async fn validate(manager: &DownloadManager, target_id: &str, req: &UrlRequest) -> ApiResponse {
    match manager.validate(target_id, &req.url).await {
        Ok(probe) => ApiResponse::ok(&ValidateResponse {
            size: probe.size_bytes,
            max_size: probe.max_size_bytes,
        }),
        Err(e) => ApiResponse::error(&e),
    }
}

/// `POST start {url}`
pub async fn start(manager: &Arc<DownloadManager>, target_id: &str, req: &UrlRequest) -> ApiResponse {
    match manager.start(target_id, &req.url).await {
        Ok(started) => ApiResponse::ok(&StartResponse {
            job_id: started.job_id,
            size: started.size_bytes,
        }),
        Err(e) => ApiResponse::error(&e),
    }
}

/// `GET progress/{job_id}`
pub async fn progress(manager: &DownloadManager, target_id: &str, job_id: &str) -> ApiResponse {
    match manager.progress(target_id, &JobId::from(job_id)).await {
        Ok(Some(job)) => ApiResponse::ok(&ProgressResponse::from(&job)),
        Ok(None) => ApiResponse::ok(&ProgressResponse::default()),
        Err(e) => ApiResponse::error(&e),
    }
}

/// `DELETE cancel/{job_id}`. Always reports success.
pub async fn cancel(manager: &DownloadManager, target_id: &str, job_id: &str) -> ApiResponse {
    manager.cancel(target_id, &JobId::from(job_id)).await;
    ApiResponse::ok(&CancelResponse { success: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn empty_progress_is_empty_object() {
        let body = serde_json::to_value(ProgressResponse::default()).unwrap();
        assert_eq!(body, json!({}));
    }

    #[test]
    fn progress_from_job() {
        let mut job = DownloadJob::new(
            JobId::from("j1"),
            "srv-1",
            "https://example.com/a.zip",
            PathBuf::from("/s/j1.tmp"),
            PathBuf::from("/t/srv-1/a.zip"),
            200,
        );
        job.downloaded_bytes = 50;
        job.progress_percent = 25.0;
        let body = serde_json::to_value(ProgressResponse::from(&job)).unwrap();
        assert_eq!(
            body,
            json!({
                "job_id": "j1",
                "progress": 25.0,
                "total_size": 200,
                "downloaded": 50,
                "status": "downloading",
            })
        );
    }

    #[test]
    fn conflict_error_body() {
        let resp = ApiResponse::error(&JobError::Conflict);
        assert_eq!(resp.status, 409);
        assert_eq!(resp.body["error"], "conflict");
    }
}
