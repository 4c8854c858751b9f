use futures_util::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{transport_cause, JobError};
use crate::fs::{delete_best_effort, TargetFilesystem};

/// Byte counts of a finished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    /// Size declared by the response, 0 if it had none.
    pub total_size_bytes: u64,
    pub downloaded_bytes: u64,
}

/// Streams one remote file into a temp file.
#[derive(Clone)]
pub struct TransferEngine {
    client: Client,
    fs: Arc<dyn TargetFilesystem>,
    max_size_bytes: u64,
}

impl TransferEngine {
    pub fn new(client: Client, fs: Arc<dyn TargetFilesystem>, max_size_bytes: u64) -> Self {
        Self {
            client,
            fs,
            max_size_bytes,
        }
    }

    /// Downloads `url` into `temp_path`, calling `on_progress(total, downloaded)` after
    /// every chunk.
    ///
    /// `total` is the GET's Content-Length, or `expected_size` (the probed size, 0 if
    /// unknown) when the response is chunked. A body longer or shorter than a non-zero
    /// total is a transfer error.
    ///
    /// The token is checked before each chunk. On any failure, cancellation included,
    /// the temp file is removed before this returns.
    pub async fn download<F>(
        &self,
        url: &Url,
        temp_path: &Path,
        expected_size: u64,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<TransferSummary, JobError>
    where
        F: FnMut(u64, u64) + Send,
    {
        let result = self
            .stream_to_file(url, temp_path, expected_size, cancel, &mut on_progress)
            .await;
        if result.is_err() {
            delete_best_effort(self.fs.as_ref(), temp_path).await;
        }
        result
    }

    async fn stream_to_file<F>(
        &self,
        url: &Url,
        temp_path: &Path,
        expected_size: u64,
        cancel: &CancellationToken,
        on_progress: &mut F,
    ) -> Result<TransferSummary, JobError>
    where
        F: FnMut(u64, u64) + Send,
    {
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
            resp = self.client.get(url.clone()).send() => {
                resp.map_err(|e| JobError::Transfer(transport_cause(&e)))?
            }
        };

        let status = resp.status();
        if !status.is_success() {
            return Err(JobError::Transfer(format!("server responded with HTTP {status}")));
        }

        let total = resp.content_length().unwrap_or(expected_size);
        if total > self.max_size_bytes {
            return Err(JobError::SizeExceeded {
                actual: total,
                max: self.max_size_bytes,
            });
        }

        let mut file = self.fs.create(temp_path).await?;
        tracing::debug!(url = %url, total, temp = %temp_path.display(), "transfer started");
        on_progress(total, 0);

        let mut downloaded: u64 = 0;
        let mut stream = resp.bytes_stream();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let bytes = chunk.map_err(|e| JobError::Transfer(transport_cause(&e)))?;

            downloaded += bytes.len() as u64;
            if downloaded > self.max_size_bytes {
                return Err(JobError::SizeExceeded {
                    actual: downloaded,
                    max: self.max_size_bytes,
                });
            }
            if total > 0 && downloaded > total {
                return Err(JobError::Transfer(format!(
                    "received more than the declared {total} bytes"
                )));
            }

            file.write_all(&bytes).await?;
            on_progress(total, downloaded);
        }

        if total > 0 && downloaded < total {
            return Err(JobError::Transfer(format!(
                "connection closed after {downloaded} of {total} bytes"
            )));
        }

        file.flush().await?;
        file.shutdown().await?;
        tracing::debug!(url = %url, downloaded, "transfer finished");

        Ok(TransferSummary {
            total_size_bytes: total,
            downloaded_bytes: downloaded,
        })
    }
}
