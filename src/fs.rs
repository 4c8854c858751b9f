//! Target filesystem access.
//!
//! Downloads land in `<targets_root>/<target_id>/<file name>`; in-flight bytes
//! live in `<scratch_dir>/<job_id>.tmp` until the finalizer moves them.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWrite;
use url::Url;

pub type FileWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Storage operations the download manager needs from its host.
#[async_trait]
pub trait TargetFilesystem: Send + Sync {
    /// Resolves `relative` inside the target's root.
    fn path_for(&self, target_id: &str, relative: &str) -> PathBuf;

    /// Location for temporary files that are not yet visible in any target.
    fn scratch_path(&self, name: &str) -> PathBuf;

    async fn exists(&self, path: &Path) -> bool;

    /// Opens a fresh file for writing. Fails if the file already exists.
    async fn create(&self, path: &Path) -> io::Result<FileWriter>;

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    async fn delete(&self, path: &Path) -> io::Result<()>;
}

/// Plain local directories.
#[derive(Debug, Clone)]
pub struct LocalFilesystem {
    targets_root: PathBuf,
    scratch_dir: PathBuf,
}

impl LocalFilesystem {
    pub fn new(targets_root: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            targets_root: targets_root.into(),
            scratch_dir: scratch_dir.into(),
        }
    }
}

#[async_trait]
impl TargetFilesystem for LocalFilesystem {
    fn path_for(&self, target_id: &str, relative: &str) -> PathBuf {
        self.targets_root
            .join(target_id)
            .join(relative.trim_start_matches('/'))
    }

    fn scratch_path(&self, name: &str) -> PathBuf {
        self.scratch_dir.join(name)
    }

    async fn exists(&self, path: &Path) -> bool {
        // symlink_metadata so a dangling link still counts as occupied.
        fs::symlink_metadata(path).await.is_ok()
    }

    async fn create(&self, path: &Path) -> io::Result<FileWriter> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        Ok(Box::new(file))
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(from, to).await
    }

    async fn delete(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path).await
    }
}

/// Deletes `path`, logging instead of failing. A missing file is not an error.
pub async fn delete_best_effort(fs: &dyn TargetFilesystem, path: &Path) {
    match fs.delete(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed temp file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "could not remove temp file; it needs manual cleanup"
        ),
    }
}

/// Last path segment of `url`, if it is usable as a plain file name.
pub fn file_name_from_url(url: &Url) -> Option<String> {
    let name = url.path_segments()?.rfind(|s| !s.is_empty())?;
    let usable = name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control);
    usable.then(|| name.to_string())
}
