//! # Access Filter
//!
//! A viewer may only see the contents of changesets and patches in repositories
//! they can access. Changesets in other repositories are reduced to a
//! [`HiddenChangeset`], which still counts towards totals but carries nothing
//! that reveals repository contents.
//!
//! Filtering a listing by review or check state is unsafe: running such a
//! filter before masking would let a viewer learn the review or check state of
//! a changeset they cannot see. Hidden changesets are therefore dropped from
//! such listings altogether instead of being masked.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::context::Actor;
use crate::errors::CampaignsError;
use crate::models::{
    CampaignId, Changeset, ChangesetCheckState, ChangesetId, ChangesetReviewState,
    ChangesetState, DiffStat, Patch, RepoId,
};
use crate::store::{ListChangesetsOpts, StoreError};

#[cfg(test)]
#[path = "access_tests.rs"]
mod tests;

/// Answers which repositories a viewer can see.
#[async_trait]
pub trait RepoVisibility: Send + Sync {
    /// Returns the subset of `repo_ids` visible to `viewer`.
    async fn visible_repos(
        &self,
        viewer: Option<&Actor>,
        repo_ids: &[RepoId],
    ) -> Result<HashSet<RepoId>, StoreError>;
}

/// Every repository is visible to everyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllReposVisible;

#[async_trait]
impl RepoVisibility for AllReposVisible {
    async fn visible_repos(
        &self,
        _viewer: Option<&Actor>,
        repo_ids: &[RepoId],
    ) -> Result<HashSet<RepoId>, StoreError> {
        Ok(repo_ids.iter().copied().collect())
    }
}

/// The fields of a changeset that are safe to show to anyone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiddenChangeset {
    pub id: ChangesetId,
    pub state: ChangesetState,
    pub campaign_ids: Vec<CampaignId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_sync_at: Option<DateTime<Utc>>,
}

impl From<&Changeset> for HiddenChangeset {
    fn from(changeset: &Changeset) -> Self {
        HiddenChangeset {
            id: changeset.id,
            state: changeset.state,
            campaign_ids: changeset.campaign_ids.clone(),
            created_at: changeset.created_at,
            updated_at: changeset.updated_at,
            next_sync_at: changeset.next_sync_at,
        }
    }
}

/// A changeset as presented to one viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangesetView {
    Full(Changeset),
    Hidden(HiddenChangeset),
}

impl ChangesetView {
    /// Masks `changeset` unless its repository is in `visible`.
    pub fn for_viewer(changeset: Changeset, visible: &HashSet<RepoId>) -> Self {
        if visible.contains(&changeset.repo.id) {
            ChangesetView::Full(changeset)
        } else {
            ChangesetView::Hidden(HiddenChangeset::from(&changeset))
        }
    }

    pub fn as_full(&self) -> Option<&Changeset> {
        match self {
            ChangesetView::Full(changeset) => Some(changeset),
            ChangesetView::Hidden(_) => None,
        }
    }

    pub fn as_hidden(&self) -> Option<&HiddenChangeset> {
        match self {
            ChangesetView::Hidden(hidden) => Some(hidden),
            ChangesetView::Full(_) => None,
        }
    }

    pub fn id(&self) -> ChangesetId {
        match self {
            ChangesetView::Full(c) => c.id,
            ChangesetView::Hidden(h) => h.id,
        }
    }

    pub fn state(&self) -> ChangesetState {
        match self {
            ChangesetView::Full(c) => c.state,
            ChangesetView::Hidden(h) => h.state,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            ChangesetView::Full(c) => c.created_at,
            ChangesetView::Hidden(h) => h.created_at,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            ChangesetView::Full(c) => c.updated_at,
            ChangesetView::Hidden(h) => h.updated_at,
        }
    }

    pub fn next_sync_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ChangesetView::Full(c) => c.next_sync_at,
            ChangesetView::Hidden(h) => h.next_sync_at,
        }
    }
}

/// Raw listing arguments as they arrive from a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListChangesetsArgs {
    pub first: Option<i32>,
    pub state: Option<String>,
    pub review_state: Option<String>,
    pub check_state: Option<String>,
}

/// Whether a listing with these arguments may include hidden changesets.
pub fn is_safe_list_filter(args: &ListChangesetsArgs) -> bool {
    args.review_state.is_none() && args.check_state.is_none()
}

/// Validates listing arguments and turns them into store options.
///
/// Returns the options and whether the filter is safe (see
/// [`is_safe_list_filter`]).
///
/// # Errors
///
/// Returns a validation error for unknown state values and a negative `first`.
pub fn list_changeset_opts_from_args(
    args: &ListChangesetsArgs,
) -> Result<(ListChangesetsOpts, bool), CampaignsError> {
    let invalid = |e: campaigns_developer_platforms::errors::Error| {
        CampaignsError::Validation(e.to_string())
    };

    let mut opts = ListChangesetsOpts::default();

    if let Some(first) = args.first {
        let limit = usize::try_from(first).map_err(|_| {
            CampaignsError::Validation(format!("first must not be negative, got {}", first))
        })?;
        opts.limit = Some(limit);
    }
    if let Some(state) = &args.state {
        opts.state = Some(state.parse::<ChangesetState>().map_err(invalid)?);
    }
    if let Some(state) = &args.review_state {
        opts.review_state = Some(state.parse::<ChangesetReviewState>().map_err(invalid)?);
    }
    if let Some(state) = &args.check_state {
        opts.check_state = Some(state.parse::<ChangesetCheckState>().map_err(invalid)?);
    }

    Ok((opts, is_safe_list_filter(args)))
}

/// The result of masking a listing for one viewer.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredChangesets {
    pub nodes: Vec<ChangesetView>,

    /// How many of `nodes` are hidden
    pub hidden_count: usize,
}

/// Masks or drops the changesets whose repository the viewer cannot see.
///
/// With a safe filter invisible changesets are masked; with an unsafe one they
/// are left out entirely.
pub fn filter_changesets(
    changesets: Vec<Changeset>,
    visible: &HashSet<RepoId>,
    safe: bool,
) -> FilteredChangesets {
    let nodes: Vec<ChangesetView> = changesets
        .into_iter()
        .filter(|c| safe || visible.contains(&c.repo.id))
        .map(|c| ChangesetView::for_viewer(c, visible))
        .collect();
    let hidden_count = nodes.iter().filter(|n| n.as_hidden().is_some()).count();

    FilteredChangesets {
        nodes,
        hidden_count,
    }
}

/// Sums the diff stats of the patches in repositories the viewer can see.
///
/// # Errors
///
/// Returns [`CampaignsError::Integrity`] when a visible patch has no diff stat:
/// stats are computed when patches are stored, so a missing one is a defect.
pub fn patch_set_diff_stat(
    patches: &[Patch],
    visible: &HashSet<RepoId>,
) -> Result<DiffStat, CampaignsError> {
    patches
        .iter()
        .filter(|p| visible.contains(&p.repo.id))
        .map(|p| {
            p.diff_stat
                .ok_or_else(|| CampaignsError::Integrity(format!("patch {} has no diff stat", p.id)))
        })
        .sum()
}
