use std::path::PathBuf;

use async_trait::async_trait;
use campaigns_core::models::RepoRef;
use campaigns_core::resolvers::{FileContents, PatchResolver};
use campaigns_core::store::StoreError;
use clap::Args;
use tracing::{debug, info, instrument};

use crate::commands::read_patch;
use crate::errors::CliError;

#[cfg(test)]
#[path = "preview_tests.rs"]
mod tests;

/// Arguments for the preview command
#[derive(Args, Debug)]
pub struct PreviewArgs {
    /// Directory holding the files before the change
    #[arg(long, default_value = ".")]
    pub base: PathBuf,

    /// Path to a unified diff
    pub diff: PathBuf,

    /// Only preview this file (path after the change)
    #[arg(long)]
    pub file: Option<String>,
}

/// Reads base revisions of files from a local directory.
///
/// The directory stands in for the repository at the patch's base revision,
/// so repository and revision are ignored.
#[derive(Debug)]
pub struct LocalFiles {
    root: PathBuf,
}

impl LocalFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileContents for LocalFiles {
    async fn file_content(
        &self,
        _repo: &RepoRef,
        _rev: &str,
        path: &str,
    ) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.root.join(path)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Backend(format!("Failed to read {}: {}", path, e))),
        }
    }
}

/// Execute the preview command
#[instrument(skip(args), fields(diff = ?args.diff, base = ?args.base))]
pub async fn execute(args: PreviewArgs) -> Result<(), CliError> {
    let contents = LocalFiles::new(&args.base);
    let previews = preview_files(&args, &contents).await?;
    if previews.is_empty() {
        info!("Nothing to preview");
    }

    for (path, content) in previews {
        println!("==> {} <==", path);
        print!("{}", content);
    }
    Ok(())
}

/// Applies every file diff of the patch to its base file.
///
/// Deleted files have no new content and are skipped.
pub async fn preview_files(
    args: &PreviewArgs,
    contents: &dyn FileContents,
) -> Result<Vec<(String, String)>, CliError> {
    let resolver = PatchResolver::new(read_patch(&args.diff, "HEAD")?);
    let page = resolver.file_diffs(None, None)?;

    let mut previews = Vec::new();
    for node in &page.nodes {
        let Some(path) = node.file_diff().new_path() else {
            continue;
        };
        if args.file.as_deref().is_some_and(|wanted| wanted != path) {
            continue;
        }

        debug!(path, "Previewing file");
        let content = node.preview_new_file(contents).await?;
        previews.push((path.to_string(), content.to_string()));
    }

    if let Some(wanted) = &args.file {
        if previews.is_empty() {
            return Err(CliError::InvalidArguments(format!(
                "The diff does not change {}",
                wanted
            )));
        }
    }
    Ok(previews)
}
