//! Read-side views over stored patches.
//!
//! A resolver holds an immutable snapshot of the row it was built from plus
//! the lazily computed values derived from it. Memoized state lives and dies
//! with the resolver, so nothing is shared between unrelated requests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::diff::{apply_patch, FileDiff, FileDiffConnection};
use crate::errors::CampaignsError;
use crate::ids::{marshal_id, EntityKind};
use crate::models::{DiffStat, Patch, RepoRef};
use crate::store::StoreError;

#[cfg(test)]
#[path = "resolvers_tests.rs"]
mod tests;

/// Reads file contents from repositories.
#[async_trait]
pub trait FileContents: Send + Sync {
    /// Returns the content of `path` at `rev`, or `None` if the file does not
    /// exist there.
    async fn file_content(
        &self,
        repo: &RepoRef,
        rev: &str,
        path: &str,
    ) -> Result<Option<String>, StoreError>;
}

/// One window of a patch's file diffs.
#[derive(Debug)]
pub struct FileDiffResolverPage {
    pub nodes: Vec<FileDiffResolver>,
    pub end_cursor: String,
    pub has_next_page: bool,
}

#[derive(Debug)]
pub struct PatchResolver {
    patch: Arc<Patch>,
    file_diffs: FileDiffConnection,
}

impl PatchResolver {
    pub fn new(patch: Patch) -> Self {
        let file_diffs = FileDiffConnection::new(patch.diff.as_str());
        PatchResolver {
            patch: Arc::new(patch),
            file_diffs,
        }
    }

    pub fn id(&self) -> String {
        marshal_id(EntityKind::Patch, self.patch.id)
    }

    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    /// The stored diff stat, or one computed from the diff when none was
    /// stored yet.
    pub fn diff_stat(&self) -> Result<DiffStat, CampaignsError> {
        if let Some(stat) = self.patch.diff_stat {
            return Ok(stat);
        }

        debug!(patch_id = self.patch.id, "Computing missing diff stat");
        let page = self.file_diffs.page(None, None)?;
        Ok(page.nodes.iter().map(|f| f.stat()).sum())
    }

    /// Returns up to `first` file diffs after the cursor `after`.
    ///
    /// Pages of one resolver share a single incremental parse of the diff.
    pub fn file_diffs(
        &self,
        first: Option<i32>,
        after: Option<&str>,
    ) -> Result<FileDiffResolverPage, CampaignsError> {
        let page = self.file_diffs.page(first, after)?;
        let nodes = page
            .nodes
            .into_iter()
            .map(|file_diff| FileDiffResolver::new(Arc::clone(&self.patch), file_diff))
            .collect();

        Ok(FileDiffResolverPage {
            nodes,
            end_cursor: page.end_cursor,
            has_next_page: page.has_next_page,
        })
    }

    pub fn file_diff_count(&self) -> Result<usize, CampaignsError> {
        Ok(self.file_diffs.total_count()?)
    }
}

#[derive(Debug)]
pub struct FileDiffResolver {
    patch: Arc<Patch>,
    file_diff: Arc<FileDiff>,
    new_content: OnceCell<String>,
}

impl FileDiffResolver {
    fn new(patch: Arc<Patch>, file_diff: Arc<FileDiff>) -> Self {
        FileDiffResolver {
            patch,
            file_diff,
            new_content: OnceCell::new(),
        }
    }

    pub fn file_diff(&self) -> &FileDiff {
        &self.file_diff
    }

    pub fn stat(&self) -> DiffStat {
        self.file_diff.stat()
    }

    /// The content of the file after the patch is applied to the base
    /// revision.
    ///
    /// The result is computed once per resolver. A failed read of the base
    /// file is not memoized, so a later call tries again.
    pub async fn preview_new_file(
        &self,
        contents: &dyn FileContents,
    ) -> Result<&str, CampaignsError> {
        let content = self
            .new_content
            .get_or_try_init(|| async {
                let old_content = match self.file_diff.old_path() {
                    Some(path) => contents
                        .file_content(&self.patch.repo, &self.patch.base_ref, path)
                        .await
                        .map_err(CampaignsError::store("file_content"))?
                        .unwrap_or_default(),
                    None => String::new(),
                };
                Ok::<_, CampaignsError>(apply_patch(&old_content, &self.file_diff))
            })
            .await?;

        Ok(content.as_str())
    }
}
