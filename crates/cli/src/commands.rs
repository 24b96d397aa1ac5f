use std::fs;
use std::path::Path;

use campaigns_core::models::{Patch, RepoRef};
use tracing::debug;

use crate::errors::CliError;

/// Configuration file management commands
pub mod config_cmd;
/// Paging through the file diffs of a patch
pub mod diff;
/// Previewing files after a patch is applied
pub mod preview;
/// Diff statistics of a patch
pub mod stat;
/// Synchronizing stored changesets with GitHub
pub mod sync;

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;

/// Reads a unified diff from disk and wraps it in a patch against `base_ref`.
///
/// The patch is not stored anywhere, so its ids and repository are
/// placeholders.
pub fn read_patch(path: &Path, base_ref: &str) -> Result<Patch, CliError> {
    debug!("Reading diff from {:?}", path);
    let diff = fs::read_to_string(path)
        .map_err(|e| CliError::IoError(format!("Failed to read {:?}: {}", path, e)))?;

    Ok(Patch {
        id: 1,
        patch_set_id: 1,
        repo: RepoRef {
            id: 1,
            owner: "local".to_string(),
            name: "workspace".to_string(),
        },
        base_ref: base_ref.to_string(),
        diff,
        diff_stat: None,
    })
}
