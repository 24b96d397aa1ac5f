//! # Store
//!
//! The persistence boundary of the engine. Every call reads or writes a single
//! row (or one batch of rows of one kind) atomically; there are no multi-entity
//! transactions.
//!
//! Listings return the matching items together with the total number of
//! matches before `limit` was applied.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    Campaign, CampaignId, CampaignStateFilter, Changeset, ChangesetCheckState, ChangesetEvent,
    ChangesetId, ChangesetReviewState, ChangesetState, Patch, PatchId, PatchSet, PatchSetId,
    UserId,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested row does not exist.
    #[error("no results")]
    NoResults,

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("store backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetCampaignOpts {
    pub id: CampaignId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListCampaignsOpts {
    pub state: CampaignStateFilter,

    /// Only campaigns authored by this user
    pub only_for_author: Option<UserId>,

    /// Only campaigns containing this changeset
    pub changeset_id: Option<ChangesetId>,

    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetChangesetOpts {
    pub id: ChangesetId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListChangesetsOpts {
    pub campaign_id: Option<CampaignId>,
    pub ids: Option<Vec<ChangesetId>>,
    pub state: Option<ChangesetState>,
    pub review_state: Option<ChangesetReviewState>,
    pub check_state: Option<ChangesetCheckState>,

    /// Only changesets with a `next_sync_at` at or before this time
    pub due_before: Option<DateTime<Utc>>,

    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetPatchSetOpts {
    pub id: PatchSetId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPatchesOpts {
    pub patch_set_id: Option<PatchSetId>,

    /// Leave `Patch::diff` empty, for callers that only need metadata
    pub no_diff: bool,

    pub limit: Option<usize>,
}

/// The fields written back by a sync of a changeset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesetSyncUpdate {
    pub state: ChangesetState,
    pub review_state: ChangesetReviewState,
    pub check_state: ChangesetCheckState,
    pub title: String,
    pub body: Option<String>,
    pub external_updated_at: Option<DateTime<Utc>>,
    pub next_sync_at: Option<DateTime<Utc>>,
}

/// Persistence of campaigns, changesets and patch sets.
///
/// Lookups of a single row return [`StoreError::NoResults`] when the row does
/// not exist, which callers can tell apart from a failing backend.
///
/// Rows are created with `id = 0` and come back with their assigned identity.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_campaign(&self, opts: &GetCampaignOpts) -> Result<Campaign, StoreError>;

    async fn list_campaigns(
        &self,
        opts: &ListCampaignsOpts,
    ) -> Result<(Vec<Campaign>, usize), StoreError>;

    async fn create_campaign(&self, campaign: Campaign) -> Result<Campaign, StoreError>;

    async fn update_campaign(&self, campaign: &Campaign) -> Result<(), StoreError>;

    async fn get_changeset(&self, opts: &GetChangesetOpts) -> Result<Changeset, StoreError>;

    async fn list_changesets(
        &self,
        opts: &ListChangesetsOpts,
    ) -> Result<(Vec<Changeset>, usize), StoreError>;

    async fn create_changeset(&self, changeset: Changeset) -> Result<Changeset, StoreError>;

    /// Writes the host derived fields of a changeset. Only the sync worker
    /// calls this.
    async fn update_changeset_sync(
        &self,
        id: ChangesetId,
        update: &ChangesetSyncUpdate,
    ) -> Result<Changeset, StoreError>;

    /// Rewrites campaign membership and the originating patch of a changeset.
    /// Only the campaign service calls this.
    async fn update_changeset_links(
        &self,
        id: ChangesetId,
        campaign_ids: &[CampaignId],
        patch_id: Option<PatchId>,
    ) -> Result<Changeset, StoreError>;

    async fn get_patch_set(&self, opts: &GetPatchSetOpts) -> Result<PatchSet, StoreError>;

    /// Stores a patch set together with its patches, in order.
    async fn create_patch_set(
        &self,
        patch_set: PatchSet,
        patches: Vec<Patch>,
    ) -> Result<(PatchSet, Vec<Patch>), StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the stored patch set was already
    /// consumed by another campaign.
    async fn update_patch_set(&self, patch_set: &PatchSet) -> Result<(), StoreError>;

    async fn get_patch(&self, id: PatchId) -> Result<Patch, StoreError>;

    async fn list_patches(
        &self,
        opts: &ListPatchesOpts,
    ) -> Result<(Vec<Patch>, usize), StoreError>;

    async fn list_changeset_events(
        &self,
        changeset_id: ChangesetId,
    ) -> Result<Vec<ChangesetEvent>, StoreError>;

    /// Appends events. Events are never updated.
    async fn create_changeset_events(
        &self,
        events: Vec<ChangesetEvent>,
    ) -> Result<Vec<ChangesetEvent>, StoreError>;
}
