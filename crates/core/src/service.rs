//! # Campaign Service
//!
//! The request-facing operations of the engine. Every operation takes the
//! [`RequestContext`] of the caller and opaque ids as they arrive from
//! clients, authorizes the caller, validates the input before touching
//! anything, and only then writes.
//!
//! ## Lifecycle
//!
//! ```text
//! Draft ──apply──▶ Open ──close──▶ Closed
//!   │               │                │
//!   └───────────────┴─────delete─────┴──▶ Deleted
//! ```
//!
//! Applying a patch set publishes one changeset per patched repository to the
//! code host, updates changesets whose patch changed and closes changesets in
//! repositories the patch set no longer touches. Every changeset that was
//! touched is handed to the [`SyncQueue`], which owns all host derived fields
//! from then on.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use campaigns_developer_platforms::models::{ChangesetUpdate, NewChangeset};
use campaigns_developer_platforms::ChangesetSource;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::access::{
    filter_changesets, list_changeset_opts_from_args, patch_set_diff_stat, ChangesetView,
    ListChangesetsArgs, RepoVisibility,
};
use crate::config::CampaignsConfig;
use crate::context::{Actor, Clock, RequestContext};
use crate::diff::diff_stat;
use crate::errors::CampaignsError;
use crate::ids::{unmarshal_id, EntityKind};
use crate::models::{
    parse_campaign_state, Campaign, CampaignId, CampaignState, Changeset, ChangesetEvent,
    ChangesetId, ChangesetState, DiffStat, Namespace, Patch, PatchId, PatchSet, PatchSetId,
    RepoId, RepoRef,
};
use crate::resolvers::PatchResolver;
use crate::store::{
    GetCampaignOpts, GetChangesetOpts, GetPatchSetOpts, ListCampaignsOpts, ListChangesetsOpts,
    ListPatchesOpts, Store, StoreError,
};
use crate::sync::SyncQueue;

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateCampaignArgs {
    /// Opaque id of the owning user or organization
    pub namespace: String,
    pub name: String,
    pub description: Option<String>,
    pub branch: Option<String>,

    /// Opaque id of the patch set to attach
    pub patch_set: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyCampaignArgs {
    pub namespace: String,
    pub patch_set: String,

    /// The campaign to apply to. A new campaign is created when absent.
    pub campaign: Option<String>,

    pub name: String,
    pub description: Option<String>,

    /// Defaults to the branch of the existing campaign
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveCampaignArgs {
    pub campaign: String,
    pub new_name: Option<String>,
    pub new_namespace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListCampaignsArgs {
    pub first: Option<i32>,
    pub state: Option<String>,

    /// Only campaigns the viewer may administer
    pub viewer_can_administer: Option<bool>,
}

/// A patch to store as part of a new patch set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPatch {
    pub repo: RepoRef,
    pub base_ref: String,
    pub diff: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CampaignConnection {
    pub nodes: Vec<Campaign>,
    pub total_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangesetConnection {
    pub nodes: Vec<ChangesetView>,
    pub total_count: usize,
    pub hidden_count: usize,
}

#[derive(Debug, Default)]
pub struct PatchConnection {
    pub nodes: Vec<PatchResolver>,
    pub total_count: usize,
}

/// What applying a patch set to a campaign would do, by repository.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CampaignDelta {
    /// Patches for repositories without a changeset yet
    pub create: Vec<Patch>,

    /// Changesets whose diff, title or body changed, with their new patch
    pub update: Vec<(Changeset, Patch)>,

    /// Changesets that stay as they are, with the patch they now belong to
    pub unchanged: Vec<(Changeset, Patch)>,

    /// Changesets in repositories the patch set no longer touches
    pub close: Vec<Changeset>,
}

impl CampaignDelta {
    /// Whether applying the delta would write nothing at all.
    pub fn is_empty(&self) -> bool {
        self.create.is_empty()
            && self.update.is_empty()
            && self.close.is_empty()
            && self
                .unchanged
                .iter()
                .all(|(changeset, patch)| changeset.patch_id == Some(patch.id))
    }
}

/// Everything an apply needs, validated but not yet written.
#[derive(Debug)]
struct ApplyPlan {
    campaign: Option<Campaign>,
    namespace: Namespace,
    name: String,
    description: Option<String>,
    branch: String,
    patch_set: PatchSet,
    delta: CampaignDelta,
}

impl ApplyPlan {
    /// The campaign already reflects this plan, so applying it is a no-op.
    fn is_applied(&self) -> bool {
        let Some(campaign) = &self.campaign else {
            return false;
        };

        campaign.state == CampaignState::Open
            && campaign.patch_set_id == Some(self.patch_set.id)
            && self.patch_set.consumed_by == Some(campaign.id)
            && campaign.namespace == self.namespace
            && campaign.name == self.name
            && campaign.description == self.description
            && campaign.branch.as_deref() == Some(self.branch.as_str())
            && self.delta.is_empty()
    }
}

/// The campaigns engine as seen by request handlers.
pub struct CampaignService {
    store: Arc<dyn Store>,
    source: Arc<dyn ChangesetSource>,
    visibility: Arc<dyn RepoVisibility>,
    sync: SyncQueue,
    config: CampaignsConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CampaignService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignService")
            .field("sync", &self.sync)
            .field("config", &self.config)
            .finish()
    }
}

impl CampaignService {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn ChangesetSource>,
        visibility: Arc<dyn RepoVisibility>,
        sync: SyncQueue,
        config: CampaignsConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        CampaignService {
            store,
            source,
            visibility,
            sync,
            config,
            clock,
        }
    }

    /// Creates a draft campaign.
    ///
    /// Only site admins may create campaigns.
    #[instrument(skip(self, ctx, args), fields(name = %args.name), err)]
    pub async fn create_campaign(
        &self,
        ctx: &RequestContext,
        args: CreateCampaignArgs,
    ) -> Result<Campaign, CampaignsError> {
        let actor = ctx.check_site_admin()?;
        let namespace = Namespace::from_id(&args.namespace)?;
        validate_name(&args.name)?;

        let now = self.clock.now();
        let patch_set_id = match &args.patch_set {
            Some(token) => {
                let patch_set = self
                    .load_patch_set(ctx, decode_id(EntityKind::PatchSet, token)?)
                    .await?;
                check_patch_set_usable(&patch_set, None, now)?;
                Some(patch_set.id)
            }
            None => None,
        };

        let campaign = Campaign {
            id: 0,
            name: args.name,
            description: args.description,
            branch: args.branch,
            author_id: actor.user_id,
            namespace,
            patch_set_id,
            state: CampaignState::Draft,
            created_at: now,
            updated_at: now,
            closed_at: None,
            deleted_at: None,
        };
        let campaign = ctx
            .guard(self.store.create_campaign(campaign))
            .await?
            .map_err(CampaignsError::store("create_campaign"))?;

        info!(
            campaign_id = campaign.id,
            author_id = actor.user_id,
            "Created campaign"
        );
        Ok(campaign)
    }

    /// Binds a patch set to a new or existing campaign and reconciles the
    /// campaign's changesets with it.
    ///
    /// Applying the patch set a campaign already carries, with unchanged
    /// name, description, branch and namespace, returns the campaign without
    /// writing anything or calling the code host.
    ///
    /// # Errors
    ///
    /// Fails validation when no branch is known, when the patch set expired
    /// before it was applied, or when it was applied to another campaign. A
    /// failing code host call aborts the apply; applying again picks up where
    /// it stopped.
    #[instrument(
        skip(self, ctx, args),
        fields(campaign = ?args.campaign, patch_set = %args.patch_set),
        err
    )]
    pub async fn apply_campaign(
        &self,
        ctx: &RequestContext,
        args: ApplyCampaignArgs,
    ) -> Result<Campaign, CampaignsError> {
        let plan = self.prepare_apply(ctx, &args).await?;
        if plan.is_applied() {
            if let Some(campaign) = &plan.campaign {
                debug!(
                    campaign_id = campaign.id,
                    "Campaign already matches the patch set"
                );
                return Ok(campaign.clone());
            }
        }

        let actor = ctx.require_actor()?;
        let now = self.clock.now();
        let branch = plan.branch;

        let mut campaign = match plan.campaign {
            Some(mut campaign) => {
                campaign.name = plan.name;
                campaign.description = plan.description;
                campaign.namespace = plan.namespace;
                campaign.branch = Some(branch.clone());
                campaign.patch_set_id = Some(plan.patch_set.id);
                campaign
            }
            None => {
                let draft = Campaign {
                    id: 0,
                    name: plan.name,
                    description: plan.description,
                    branch: Some(branch.clone()),
                    author_id: actor.user_id,
                    namespace: plan.namespace,
                    patch_set_id: Some(plan.patch_set.id),
                    state: CampaignState::Draft,
                    created_at: now,
                    updated_at: now,
                    closed_at: None,
                    deleted_at: None,
                };
                ctx.guard(self.store.create_campaign(draft))
                    .await?
                    .map_err(CampaignsError::store("create_campaign"))?
            }
        };

        if plan.patch_set.consumed_by.is_none() {
            let mut patch_set = plan.patch_set.clone();
            patch_set.consumed_by = Some(campaign.id);
            ctx.guard(self.store.update_patch_set(&patch_set))
                .await?
                .map_err(CampaignsError::store("update_patch_set"))?;
        }

        let delta = plan.delta;
        let mut touched = Vec::new();

        for patch in &delta.create {
            let changeset = self.publish_changeset(ctx, &campaign, &branch, patch).await?;
            touched.push(changeset.id);
        }

        for (changeset, patch) in &delta.update {
            let Some(external_id) = changeset.external_id.as_deref() else {
                continue;
            };
            let update = ChangesetUpdate {
                title: Some(campaign.name.clone()),
                body: campaign.description.clone(),
                base_ref: Some(abbreviate_ref(&patch.base_ref).to_string()),
            };
            ctx.guard(self.source.update_changeset(
                &changeset.repo.owner,
                &changeset.repo.name,
                external_id,
                &update,
            ))
            .await?
            .map_err(CampaignsError::code_host("update_changeset"))?;

            let campaign_ids = with_campaign(changeset, campaign.id);
            self.link_changeset(ctx, changeset, &campaign_ids, Some(patch.id))
                .await?;
            touched.push(changeset.id);
        }

        for (changeset, patch) in &delta.unchanged {
            if changeset.patch_id != Some(patch.id) {
                let campaign_ids = with_campaign(changeset, campaign.id);
                self.link_changeset(ctx, changeset, &campaign_ids, Some(patch.id))
                    .await?;
            }
        }

        for changeset in &delta.close {
            if changeset.state == ChangesetState::Open {
                if let Some(external_id) = changeset.external_id.as_deref() {
                    ctx.guard(self.source.close_changeset(
                        &changeset.repo.owner,
                        &changeset.repo.name,
                        external_id,
                    ))
                    .await?
                    .map_err(CampaignsError::code_host("close_changeset"))?;
                }
            }

            let campaign_ids = without_campaign(changeset, campaign.id);
            self.link_changeset(ctx, changeset, &campaign_ids, changeset.patch_id)
                .await?;
            touched.push(changeset.id);
        }

        if campaign.state == CampaignState::Draft {
            campaign.state = CampaignState::Open;
        }
        campaign.updated_at = now;
        ctx.guard(self.store.update_campaign(&campaign))
            .await?
            .map_err(CampaignsError::store("update_campaign"))?;

        self.enqueue_all(ctx, &touched).await;

        info!(
            campaign_id = campaign.id,
            patch_set_id = plan.patch_set.id,
            created = delta.create.len(),
            updated = delta.update.len(),
            closed = delta.close.len(),
            "Applied patch set to campaign"
        );
        Ok(campaign)
    }

    /// Computes what [`CampaignService::apply_campaign`] would do with the
    /// same arguments, without writing anything.
    pub async fn compute_campaign_delta(
        &self,
        ctx: &RequestContext,
        args: &ApplyCampaignArgs,
    ) -> Result<CampaignDelta, CampaignsError> {
        Ok(self.prepare_apply(ctx, args).await?.delta)
    }

    /// Moves an open campaign to `Closed`, optionally closing its open
    /// changesets on their code hosts.
    ///
    /// A changeset that fails to close is logged and skipped; the campaign
    /// stays closed.
    #[instrument(skip(self, ctx), err)]
    pub async fn close_campaign(
        &self,
        ctx: &RequestContext,
        campaign: &str,
        close_changesets: bool,
    ) -> Result<Campaign, CampaignsError> {
        ctx.require_actor()?;
        let id = decode_id(EntityKind::Campaign, campaign)?;
        let mut campaign = self.load_campaign(ctx, id).await?;
        ctx.check_site_admin_or_same_user(campaign.author_id)?;

        if !campaign.state.can_transition_to(CampaignState::Closed) {
            return Err(CampaignsError::Validation(format!(
                "campaign {} is {} and cannot be closed",
                id, campaign.state
            )));
        }

        let now = self.clock.now();
        campaign.state = CampaignState::Closed;
        campaign.closed_at = Some(now);
        campaign.updated_at = now;
        ctx.guard(self.store.update_campaign(&campaign))
            .await?
            .map_err(CampaignsError::store("update_campaign"))?;
        info!(campaign_id = id, "Closed campaign");

        if close_changesets {
            let (open, _) = ctx
                .guard(self.store.list_changesets(&ListChangesetsOpts {
                    campaign_id: Some(id),
                    state: Some(ChangesetState::Open),
                    ..Default::default()
                }))
                .await?
                .map_err(CampaignsError::store("list_changesets"))?;

            let mut requested = Vec::with_capacity(open.len());
            for changeset in &open {
                let Some(external_id) = changeset.external_id.as_deref() else {
                    continue;
                };
                match ctx
                    .guard(self.source.close_changeset(
                        &changeset.repo.owner,
                        &changeset.repo.name,
                        external_id,
                    ))
                    .await?
                {
                    Ok(()) => {
                        debug!(
                            campaign_id = id,
                            changeset_id = changeset.id,
                            "Requested changeset closure"
                        );
                    }
                    Err(e) => {
                        error!(
                            campaign_id = id,
                            changeset_id = changeset.id,
                            repository = %changeset.repo,
                            error = e.to_string(),
                            "Failed to close changeset on its code host"
                        );
                    }
                }
                requested.push(changeset.id);
            }

            self.enqueue_all(ctx, &requested).await;
        }

        Ok(campaign)
    }

    /// Marks a campaign deleted and detaches it from its changesets.
    ///
    /// Changesets and their events are kept.
    #[instrument(skip(self, ctx), err)]
    pub async fn delete_campaign(
        &self,
        ctx: &RequestContext,
        campaign: &str,
    ) -> Result<(), CampaignsError> {
        ctx.require_actor()?;
        let id = decode_id(EntityKind::Campaign, campaign)?;
        let mut campaign = self.load_campaign(ctx, id).await?;
        ctx.check_site_admin_or_same_user(campaign.author_id)?;

        if !campaign.state.can_transition_to(CampaignState::Deleted) {
            return Err(CampaignsError::Validation(format!(
                "campaign {} is {} and cannot be deleted",
                id, campaign.state
            )));
        }

        let (attached, _) = ctx
            .guard(self.store.list_changesets(&ListChangesetsOpts {
                campaign_id: Some(id),
                ..Default::default()
            }))
            .await?
            .map_err(CampaignsError::store("list_changesets"))?;
        for changeset in &attached {
            let campaign_ids = without_campaign(changeset, id);
            self.link_changeset(ctx, changeset, &campaign_ids, changeset.patch_id)
                .await?;
        }

        let now = self.clock.now();
        campaign.state = CampaignState::Deleted;
        campaign.deleted_at = Some(now);
        campaign.updated_at = now;
        ctx.guard(self.store.update_campaign(&campaign))
            .await?
            .map_err(CampaignsError::store("update_campaign"))?;

        info!(
            campaign_id = id,
            detached = attached.len(),
            "Deleted campaign"
        );
        Ok(())
    }

    /// Renames a campaign and/or moves it to another namespace.
    #[instrument(skip(self, ctx, args), fields(campaign = %args.campaign), err)]
    pub async fn move_campaign(
        &self,
        ctx: &RequestContext,
        args: MoveCampaignArgs,
    ) -> Result<Campaign, CampaignsError> {
        let actor = ctx.require_actor()?;
        if args.new_name.is_none() && args.new_namespace.is_none() {
            return Err(CampaignsError::Validation(
                "a new name or a new namespace is required".to_string(),
            ));
        }

        let id = decode_id(EntityKind::Campaign, &args.campaign)?;
        let namespace = args
            .new_namespace
            .as_deref()
            .map(Namespace::from_id)
            .transpose()?;
        if let Some(name) = &args.new_name {
            validate_name(name)?;
        }
        if let Some(namespace) = &namespace {
            check_namespace_target(&actor, namespace)?;
        }

        let mut campaign = self.load_campaign(ctx, id).await?;
        ctx.check_site_admin_or_same_user(campaign.author_id)?;

        if let Some(name) = args.new_name {
            campaign.name = name;
        }
        if let Some(namespace) = namespace {
            campaign.namespace = namespace;
        }
        campaign.updated_at = self.clock.now();
        ctx.guard(self.store.update_campaign(&campaign))
            .await?
            .map_err(CampaignsError::store("update_campaign"))?;

        info!(campaign_id = id, "Moved campaign");
        Ok(campaign)
    }

    /// Queues a changeset for an early sync without waiting for it.
    ///
    /// # Errors
    ///
    /// The zero id and unknown ids fail with the same
    /// [`CampaignsError::UnknownChangeset`]. Callers other than site admins
    /// must be the author of one of the changeset's campaigns.
    #[instrument(skip(self, ctx), err)]
    pub async fn enqueue_changeset_sync(
        &self,
        ctx: &RequestContext,
        changeset: &str,
    ) -> Result<(), CampaignsError> {
        let actor = ctx.require_actor()?;
        let id = unmarshal_id(EntityKind::Changeset, changeset)?;
        if id == 0 {
            return Err(CampaignsError::UnknownChangeset(id));
        }

        match ctx
            .guard(self.store.get_changeset(&GetChangesetOpts { id }))
            .await?
        {
            Ok(_) => {}
            Err(StoreError::NoResults) => return Err(CampaignsError::UnknownChangeset(id)),
            Err(e) => return Err(CampaignsError::store("get_changeset")(e)),
        }

        if !actor.site_admin {
            let (campaigns, _) = ctx
                .guard(self.store.list_campaigns(&ListCampaignsOpts {
                    changeset_id: Some(id),
                    ..Default::default()
                }))
                .await?
                .map_err(CampaignsError::store("list_campaigns"))?;
            if !campaigns.iter().any(|c| c.author_id == actor.user_id) {
                return Err(CampaignsError::Unauthorized(
                    "must be authenticated as the author of one of the changeset's campaigns or as an admin"
                        .to_string(),
                ));
            }
        }

        self.sync.enqueue(ctx, id).await
    }

    /// Whether the caller may change `campaign`.
    pub fn viewer_can_administer(&self, ctx: &RequestContext, campaign: &Campaign) -> bool {
        ctx.check_site_admin_or_same_user(campaign.author_id).is_ok()
    }

    pub async fn campaign_by_id(
        &self,
        ctx: &RequestContext,
        campaign: &str,
    ) -> Result<Option<Campaign>, CampaignsError> {
        self.check_read_access(ctx)?;
        let id = unmarshal_id(EntityKind::Campaign, campaign)?;
        if id == 0 {
            return Ok(None);
        }

        match ctx.guard(self.store.get_campaign(&GetCampaignOpts { id })).await? {
            Ok(campaign) if campaign.state != CampaignState::Deleted => Ok(Some(campaign)),
            Ok(_) | Err(StoreError::NoResults) => Ok(None),
            Err(e) => Err(CampaignsError::store("get_campaign")(e)),
        }
    }

    /// Returns the changeset as the caller may see it: in full, or reduced to
    /// its hidden variant when its repository is not visible to the caller.
    pub async fn changeset_by_id(
        &self,
        ctx: &RequestContext,
        changeset: &str,
    ) -> Result<Option<ChangesetView>, CampaignsError> {
        self.check_read_access(ctx)?;
        let id = unmarshal_id(EntityKind::Changeset, changeset)?;
        if id == 0 {
            return Ok(None);
        }

        let changeset = match ctx
            .guard(self.store.get_changeset(&GetChangesetOpts { id }))
            .await?
        {
            Ok(changeset) => changeset,
            Err(StoreError::NoResults) => return Ok(None),
            Err(e) => return Err(CampaignsError::store("get_changeset")(e)),
        };

        let visible = self.visible_repos(ctx, [changeset.repo.id]).await?;
        Ok(Some(ChangesetView::for_viewer(changeset, &visible)))
    }

    pub async fn list_campaigns(
        &self,
        ctx: &RequestContext,
        args: &ListCampaignsArgs,
    ) -> Result<CampaignConnection, CampaignsError> {
        self.check_read_access(ctx)?;
        let mut opts = ListCampaignsOpts {
            state: parse_campaign_state(args.state.as_deref())?,
            limit: parse_first(args.first)?,
            ..Default::default()
        };

        if args.viewer_can_administer == Some(true) {
            match ctx.actor {
                Some(actor) if actor.site_admin => {}
                Some(actor) => opts.only_for_author = Some(actor.user_id),
                None => return Ok(CampaignConnection::default()),
            }
        }

        let (nodes, total_count) = ctx
            .guard(self.store.list_campaigns(&opts))
            .await?
            .map_err(CampaignsError::store("list_campaigns"))?;
        Ok(CampaignConnection { nodes, total_count })
    }

    /// Lists the changesets of a campaign as the caller may see them.
    ///
    /// With a safe filter, invisible changesets are masked and counted. With
    /// a review or check state filter they are left out of both the nodes and
    /// the total.
    pub async fn campaign_changesets(
        &self,
        ctx: &RequestContext,
        campaign: &str,
        args: &ListChangesetsArgs,
    ) -> Result<ChangesetConnection, CampaignsError> {
        self.check_read_access(ctx)?;
        let id = decode_id(EntityKind::Campaign, campaign)?;
        let (mut opts, safe) = list_changeset_opts_from_args(args)?;
        opts.campaign_id = Some(id);

        if safe {
            let (changesets, total_count) = ctx
                .guard(self.store.list_changesets(&opts))
                .await?
                .map_err(CampaignsError::store("list_changesets"))?;
            let visible = self
                .visible_repos(ctx, changesets.iter().map(|c| c.repo.id))
                .await?;
            let filtered = filter_changesets(changesets, &visible, true);

            return Ok(ChangesetConnection {
                nodes: filtered.nodes,
                total_count,
                hidden_count: filtered.hidden_count,
            });
        }

        // The limit applies after invisible changesets were dropped.
        let limit = opts.limit.take();
        let (changesets, _) = ctx
            .guard(self.store.list_changesets(&opts))
            .await?
            .map_err(CampaignsError::store("list_changesets"))?;
        let visible = self
            .visible_repos(ctx, changesets.iter().map(|c| c.repo.id))
            .await?;
        let mut nodes = filter_changesets(changesets, &visible, false).nodes;
        let total_count = nodes.len();
        if let Some(limit) = limit {
            nodes.truncate(limit);
        }

        Ok(ChangesetConnection {
            nodes,
            total_count,
            hidden_count: 0,
        })
    }

    /// Review and CI events of a changeset, oldest first.
    ///
    /// Hidden changesets have no visible events.
    pub async fn changeset_events(
        &self,
        ctx: &RequestContext,
        changeset: &str,
    ) -> Result<Vec<ChangesetEvent>, CampaignsError> {
        let Some(view) = self.changeset_by_id(ctx, changeset).await? else {
            return Ok(Vec::new());
        };
        let Some(changeset) = view.as_full() else {
            return Ok(Vec::new());
        };

        ctx.guard(self.store.list_changeset_events(changeset.id))
            .await?
            .map_err(CampaignsError::store("list_changeset_events"))
    }

    /// The summed diff stat of the campaign's patches the caller can see.
    pub async fn campaign_diff_stat(
        &self,
        ctx: &RequestContext,
        campaign: &str,
    ) -> Result<DiffStat, CampaignsError> {
        self.check_read_access(ctx)?;
        let id = decode_id(EntityKind::Campaign, campaign)?;
        let campaign = self.load_campaign(ctx, id).await?;

        match campaign.patch_set_id {
            Some(patch_set_id) => self.visible_diff_stat(ctx, patch_set_id).await,
            None => Ok(DiffStat::default()),
        }
    }

    /// Stores a new patch set owned by the caller.
    ///
    /// The diff stat of every patch is computed here, so a stored patch
    /// without one points at a defect.
    #[instrument(skip(self, ctx, patches), fields(patches = patches.len()), err)]
    pub async fn create_patch_set(
        &self,
        ctx: &RequestContext,
        patches: Vec<NewPatch>,
    ) -> Result<(PatchSet, Vec<Patch>), CampaignsError> {
        let actor = ctx.require_actor()?;

        let mut repos = HashSet::new();
        let mut rows = Vec::with_capacity(patches.len());
        for patch in patches {
            if !repos.insert(patch.repo.id) {
                return Err(CampaignsError::Validation(format!(
                    "more than one patch for repository {}",
                    patch.repo
                )));
            }
            let stat = diff_stat(&patch.diff)?;
            rows.push(Patch {
                id: 0,
                patch_set_id: 0,
                repo: patch.repo,
                base_ref: patch.base_ref,
                diff: patch.diff,
                diff_stat: Some(stat),
            });
        }

        let now = self.clock.now();
        let patch_set = PatchSet {
            id: 0,
            user_id: actor.user_id,
            expires_at: now + self.config.patch_sets.expiry(),
            consumed_by: None,
            created_at: now,
        };
        let (patch_set, patches) = ctx
            .guard(self.store.create_patch_set(patch_set, rows))
            .await?
            .map_err(CampaignsError::store("create_patch_set"))?;

        info!(
            patch_set_id = patch_set.id,
            patches = patches.len(),
            "Created patch set"
        );
        Ok((patch_set, patches))
    }

    pub async fn patch_set_by_id(
        &self,
        ctx: &RequestContext,
        patch_set: &str,
    ) -> Result<Option<PatchSet>, CampaignsError> {
        self.check_read_access(ctx)?;
        let id = unmarshal_id(EntityKind::PatchSet, patch_set)?;
        if id == 0 {
            return Ok(None);
        }

        match ctx.guard(self.store.get_patch_set(&GetPatchSetOpts { id })).await? {
            Ok(patch_set) => Ok(Some(patch_set)),
            Err(StoreError::NoResults) => Ok(None),
            Err(e) => Err(CampaignsError::store("get_patch_set")(e)),
        }
    }

    /// The patches of a patch set in repositories the caller can see.
    pub async fn patch_set_patches(
        &self,
        ctx: &RequestContext,
        patch_set: &str,
        first: Option<i32>,
    ) -> Result<PatchConnection, CampaignsError> {
        self.check_read_access(ctx)?;
        let id = decode_id(EntityKind::PatchSet, patch_set)?;
        let limit = parse_first(first)?;

        let (patches, _) = ctx
            .guard(self.store.list_patches(&ListPatchesOpts {
                patch_set_id: Some(id),
                ..Default::default()
            }))
            .await?
            .map_err(CampaignsError::store("list_patches"))?;
        let visible = self
            .visible_repos(ctx, patches.iter().map(|p| p.repo.id))
            .await?;

        let visible_patches: Vec<Patch> = patches
            .into_iter()
            .filter(|p| visible.contains(&p.repo.id))
            .collect();
        let total_count = visible_patches.len();
        let nodes = visible_patches
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(PatchResolver::new)
            .collect();

        Ok(PatchConnection { nodes, total_count })
    }

    /// The summed diff stat of the patches the caller can see.
    pub async fn patch_set_diff_stat(
        &self,
        ctx: &RequestContext,
        patch_set: &str,
    ) -> Result<DiffStat, CampaignsError> {
        self.check_read_access(ctx)?;
        let id = decode_id(EntityKind::PatchSet, patch_set)?;
        self.visible_diff_stat(ctx, id).await
    }

    async fn visible_diff_stat(
        &self,
        ctx: &RequestContext,
        patch_set_id: PatchSetId,
    ) -> Result<DiffStat, CampaignsError> {
        let (patches, _) = ctx
            .guard(self.store.list_patches(&ListPatchesOpts {
                patch_set_id: Some(patch_set_id),
                no_diff: true,
                ..Default::default()
            }))
            .await?
            .map_err(CampaignsError::store("list_patches"))?;
        let visible = self
            .visible_repos(ctx, patches.iter().map(|p| p.repo.id))
            .await?;

        patch_set_diff_stat(&patches, &visible)
    }

    fn check_read_access(&self, ctx: &RequestContext) -> Result<(), CampaignsError> {
        if self.config.read_access_enabled {
            return Ok(());
        }
        ctx.check_site_admin().map(|_| ())
    }

    async fn visible_repos(
        &self,
        ctx: &RequestContext,
        repo_ids: impl IntoIterator<Item = RepoId>,
    ) -> Result<HashSet<RepoId>, CampaignsError> {
        let mut ids: Vec<RepoId> = repo_ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        ctx.guard(self.visibility.visible_repos(ctx.actor.as_ref(), &ids))
            .await?
            .map_err(CampaignsError::store("visible_repos"))
    }

    /// Loads a campaign for a mutation. Deleted campaigns do not exist.
    async fn load_campaign(
        &self,
        ctx: &RequestContext,
        id: CampaignId,
    ) -> Result<Campaign, CampaignsError> {
        match ctx.guard(self.store.get_campaign(&GetCampaignOpts { id })).await? {
            Ok(campaign) if campaign.state != CampaignState::Deleted => Ok(campaign),
            Ok(_) | Err(StoreError::NoResults) => Err(CampaignsError::Validation(format!(
                "campaign {} does not exist",
                id
            ))),
            Err(e) => Err(CampaignsError::store("get_campaign")(e)),
        }
    }

    async fn load_patch_set(
        &self,
        ctx: &RequestContext,
        id: PatchSetId,
    ) -> Result<PatchSet, CampaignsError> {
        match ctx.guard(self.store.get_patch_set(&GetPatchSetOpts { id })).await? {
            Ok(patch_set) => Ok(patch_set),
            Err(StoreError::NoResults) => Err(CampaignsError::Validation(format!(
                "patch set {} does not exist",
                id
            ))),
            Err(e) => Err(CampaignsError::store("get_patch_set")(e)),
        }
    }

    async fn prepare_apply(
        &self,
        ctx: &RequestContext,
        args: &ApplyCampaignArgs,
    ) -> Result<ApplyPlan, CampaignsError> {
        ctx.require_actor()?;
        let namespace = Namespace::from_id(&args.namespace)?;
        let patch_set_id = decode_id(EntityKind::PatchSet, &args.patch_set)?;
        validate_name(&args.name)?;

        let campaign = match &args.campaign {
            Some(token) => {
                let campaign = self
                    .load_campaign(ctx, decode_id(EntityKind::Campaign, token)?)
                    .await?;
                let actor = ctx.check_site_admin_or_same_user(campaign.author_id)?;
                if campaign.namespace != namespace {
                    check_namespace_target(&actor, &namespace)?;
                }
                if campaign.state == CampaignState::Closed {
                    return Err(CampaignsError::Validation(format!(
                        "campaign {} is closed and cannot be applied",
                        campaign.id
                    )));
                }
                Some(campaign)
            }
            None => {
                ctx.check_site_admin()?;
                None
            }
        };

        let branch = args
            .branch
            .clone()
            .or_else(|| campaign.as_ref().and_then(|c| c.branch.clone()))
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| {
                CampaignsError::Validation("a branch is required to publish changesets".to_string())
            })?;

        let patch_set = self.load_patch_set(ctx, patch_set_id).await?;
        check_patch_set_usable(&patch_set, campaign.as_ref().map(|c| c.id), self.clock.now())?;

        let (patches, _) = ctx
            .guard(self.store.list_patches(&ListPatchesOpts {
                patch_set_id: Some(patch_set_id),
                ..Default::default()
            }))
            .await?
            .map_err(CampaignsError::store("list_patches"))?;
        let current = match &campaign {
            Some(campaign) => {
                ctx.guard(self.store.list_changesets(&ListChangesetsOpts {
                    campaign_id: Some(campaign.id),
                    ..Default::default()
                }))
                .await?
                .map_err(CampaignsError::store("list_changesets"))?
                .0
            }
            None => Vec::new(),
        };

        let delta = self
            .build_delta(ctx, current, patches, &args.name, args.description.as_deref())
            .await?;

        Ok(ApplyPlan {
            campaign,
            namespace,
            name: args.name.clone(),
            description: args.description.clone(),
            branch,
            patch_set,
            delta,
        })
    }

    /// Matches patches to the campaign's live changesets by repository.
    ///
    /// Unpublished and deleted changesets are not live; a repository with
    /// only such changesets gets a new one.
    async fn build_delta(
        &self,
        ctx: &RequestContext,
        current: Vec<Changeset>,
        patches: Vec<Patch>,
        title: &str,
        body: Option<&str>,
    ) -> Result<CampaignDelta, CampaignsError> {
        let mut live: HashMap<RepoId, Changeset> = current
            .into_iter()
            .filter(|c| c.external_id.is_some() && c.state != ChangesetState::Deleted)
            .map(|c| (c.repo.id, c))
            .collect();

        let mut delta = CampaignDelta::default();
        for patch in patches {
            let Some(changeset) = live.remove(&patch.repo.id) else {
                delta.create.push(patch);
                continue;
            };

            let same_text = changeset.title == title && changeset.body.as_deref() == body;
            let same_diff = match changeset.patch_id {
                Some(id) if id == patch.id => true,
                Some(id) => match ctx.guard(self.store.get_patch(id)).await? {
                    Ok(previous) => previous.diff == patch.diff,
                    Err(StoreError::NoResults) => false,
                    Err(e) => return Err(CampaignsError::store("get_patch")(e)),
                },
                None => false,
            };

            if same_text && same_diff {
                delta.unchanged.push((changeset, patch));
            } else {
                delta.update.push((changeset, patch));
            }
        }

        let mut close: Vec<Changeset> = live.into_values().collect();
        close.sort_by_key(|c| c.id);
        delta.close = close;

        Ok(delta)
    }

    async fn publish_changeset(
        &self,
        ctx: &RequestContext,
        campaign: &Campaign,
        branch: &str,
        patch: &Patch,
    ) -> Result<Changeset, CampaignsError> {
        let new_changeset = NewChangeset {
            title: campaign.name.clone(),
            body: campaign.description.clone(),
            head_ref: branch.to_string(),
            base_ref: abbreviate_ref(&patch.base_ref).to_string(),
        };
        let external = ctx
            .guard(self.source.create_changeset(
                &patch.repo.owner,
                &patch.repo.name,
                &new_changeset,
            ))
            .await?
            .map_err(CampaignsError::code_host("create_changeset"))?;

        let now = self.clock.now();
        let changeset = Changeset {
            id: 0,
            repo: patch.repo.clone(),
            external_id: Some(external.external_id),
            patch_id: Some(patch.id),
            campaign_ids: vec![campaign.id],
            state: external.state,
            review_state: external.review_state,
            check_state: external.check_state,
            title: external.title,
            body: external.body,
            external_updated_at: Some(external.updated_at),
            // Due right away, in case the explicit enqueue is lost.
            next_sync_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        let changeset = ctx
            .guard(self.store.create_changeset(changeset))
            .await?
            .map_err(CampaignsError::store("create_changeset"))?;

        info!(
            campaign_id = campaign.id,
            changeset_id = changeset.id,
            repository = %changeset.repo,
            "Published changeset"
        );
        Ok(changeset)
    }

    async fn link_changeset(
        &self,
        ctx: &RequestContext,
        changeset: &Changeset,
        campaign_ids: &[CampaignId],
        patch_id: Option<PatchId>,
    ) -> Result<Changeset, CampaignsError> {
        ctx.guard(
            self.store
                .update_changeset_links(changeset.id, campaign_ids, patch_id),
        )
        .await?
        .map_err(CampaignsError::store("update_changeset_links"))
    }

    async fn enqueue_all(&self, ctx: &RequestContext, ids: &[ChangesetId]) {
        for &id in ids {
            if let Err(e) = self.sync.enqueue(ctx, id).await {
                warn!(
                    changeset_id = id,
                    error = e.to_string(),
                    "Failed to queue changeset sync"
                );
            }
        }
    }
}

/// Decodes an id that must refer to an existing entity.
fn decode_id(kind: EntityKind, token: &str) -> Result<i64, CampaignsError> {
    match unmarshal_id(kind, token)? {
        0 => Err(CampaignsError::IdIsZero),
        id => Ok(id),
    }
}

fn parse_first(first: Option<i32>) -> Result<Option<usize>, CampaignsError> {
    first
        .map(|first| {
            usize::try_from(first).map_err(|_| {
                CampaignsError::Validation(format!("first must not be negative, got {}", first))
            })
        })
        .transpose()
}

/// Only site admins may put a campaign into the namespace of another user.
fn check_namespace_target(actor: &Actor, namespace: &Namespace) -> Result<(), CampaignsError> {
    match namespace.user_id() {
        Some(user_id) if !actor.site_admin && user_id != actor.user_id => {
            Err(CampaignsError::Unauthorized(
                "cannot move a campaign into the namespace of another user".to_string(),
            ))
        }
        _ => Ok(()),
    }
}

fn validate_name(name: &str) -> Result<(), CampaignsError> {
    if name.trim().is_empty() {
        return Err(CampaignsError::Validation(
            "campaign name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// A patch set can be applied by `campaign` when nobody else consumed it and,
/// if it is still unconsumed, it has not expired yet.
fn check_patch_set_usable(
    patch_set: &PatchSet,
    campaign: Option<CampaignId>,
    now: DateTime<Utc>,
) -> Result<(), CampaignsError> {
    match patch_set.consumed_by {
        Some(owner) if Some(owner) != campaign => Err(CampaignsError::Validation(format!(
            "patch set {} was already applied to campaign {}",
            patch_set.id, owner
        ))),
        Some(_) => Ok(()),
        None if patch_set.is_expired(now) => Err(CampaignsError::Validation(format!(
            "patch set {} expired at {}",
            patch_set.id,
            patch_set.expires_at.to_rfc3339()
        ))),
        None => Ok(()),
    }
}

fn abbreviate_ref(git_ref: &str) -> &str {
    git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref)
}

fn with_campaign(changeset: &Changeset, campaign_id: CampaignId) -> Vec<CampaignId> {
    let mut ids = changeset.campaign_ids.clone();
    if !ids.contains(&campaign_id) {
        ids.push(campaign_id);
    }
    ids
}

fn without_campaign(changeset: &Changeset, campaign_id: CampaignId) -> Vec<CampaignId> {
    changeset
        .campaign_ids
        .iter()
        .copied()
        .filter(|id| *id != campaign_id)
        .collect()
}
