// src/probe.rs

use crate::error::{transport_cause, JobError};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// What a probe learned about a remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Declared size; 0 when the origin did not say.
    pub size_bytes: u64,
    pub max_size_bytes: u64,
}

impl ProbeResult {
    pub fn exceeds_cap(&self) -> bool {
        self.size_bytes > self.max_size_bytes
    }
}

/// Learns a resource's size with a body-less ranged HEAD request.
#[derive(Debug, Clone)]
pub struct SizeProbe {
    client: Client,
    timeout: Duration,
    max_size_bytes: u64,
}

impl SizeProbe {
    pub fn new(client: Client, timeout: Duration, max_size_bytes: u64) -> Self {
        Self {
            client,
            timeout,
            max_size_bytes,
        }
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    pub async fn probe(&self, url: &Url) -> Result<ProbeResult, JobError> {
        let resp = self
            .client
            .head(url.clone())
            .header(RANGE, "bytes=0-0")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| JobError::Probe(transport_cause(&e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(JobError::Probe(format!("server responded with HTTP {status}")));
        }

        let size_bytes = declared_size(resp.headers());
        tracing::debug!(url = %url, status = %status, size_bytes, "probed remote size");
        Ok(ProbeResult {
            size_bytes,
            max_size_bytes: self.max_size_bytes,
        })
    }
}

/// Full resource size from `Content-Range` (`bytes 0-0/<total>`), else `Content-Length`, else 0.
pub fn declared_size(headers: &HeaderMap) -> u64 {
    if let Some(range) = headers.get(CONTENT_RANGE).and_then(|v| v.to_str().ok()) {
        // A range answer's Content-Length is the slice, not the file, so don't fall back.
        return total_from_content_range(range).unwrap_or(0);
    }
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

fn total_from_content_range(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse::<u64>().ok()
}
