#![allow(dead_code)]

pub mod http_server;

use fetchd::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub fn sample_body(len: usize) -> Vec<u8> {
    (0u8..251).cycle().take(len).collect()
}

pub fn manager(root: &Path, max_size_bytes: u64) -> Arc<DownloadManager> {
    let fs = Arc::new(LocalFilesystem::new(root.join("targets"), root.join("scratch")));
    Arc::new(DownloadManager::new(
        JobStateStore::in_memory(StateTtls::default()),
        fs,
        reqwest::Client::new(),
        Duration::from_secs(10),
        max_size_bytes,
    ))
}

pub fn target_file(root: &Path, target: &str, name: &str) -> PathBuf {
    root.join("targets").join(target).join(name)
}

/// Number of files left in the scratch dir (0 if it was never created).
pub fn scratch_files(root: &Path) -> usize {
    std::fs::read_dir(root.join("scratch"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

/// Polls until the target has downloaded at least one byte.
pub async fn wait_for_bytes(manager: &DownloadManager, target: &str, job_id: &JobId) -> DownloadJob {
    for _ in 0..500 {
        if let Some(job) = manager.progress(target, job_id).await.unwrap() {
            if job.downloaded_bytes > 0 {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no bytes arrived for {target}");
}
