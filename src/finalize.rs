//! Moves a finished temp file into its destination without clobbering.
//!
//! The existence check here narrows, but does not close, the window between
//! `start` checking the destination and the rename: a file created in between
//! by someone else is detected; one created during the rename itself is not.

use std::path::Path;

use crate::error::JobError;
use crate::fs::TargetFilesystem;

/// Renames `temp_path` to `final_path`.
///
/// On [`JobError::DestinationConflict`] the temp file is left in place for the caller.
pub async fn finalize(
    fs: &dyn TargetFilesystem,
    temp_path: &Path,
    final_path: &Path,
) -> Result<(), JobError> {
    if fs.exists(final_path).await {
        return Err(JobError::DestinationConflict(final_path.display().to_string()));
    }
    fs.rename(temp_path, final_path).await?;
    tracing::info!(path = %final_path.display(), "download finalized");
    Ok(())
}
