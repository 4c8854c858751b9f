pub mod api;
pub mod config;
pub mod downloader;
pub mod error;
pub mod finalize;
pub mod fs;
pub mod logging;
pub mod manager;
pub mod models;
pub mod probe;
pub mod state_manager;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::config::{FetchConfig, StateBackend};
    pub use crate::error::JobError;
    pub use crate::fs::{LocalFilesystem, TargetFilesystem};
    pub use crate::manager::{DownloadManager, ManagerError, StartedJob};
    pub use crate::models::{DownloadJob, JobId, JobStatus};
    pub use crate::probe::ProbeResult;
    pub use crate::state_manager::{JobStateStore, MemoryStore, SqliteStore, StateTtls};
}
