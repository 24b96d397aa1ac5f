use chrono::Duration;

use super::*;
use crate::access::ListChangesetsArgs;
use crate::context::ManualClock;
use crate::ids::marshal_id;
use crate::memory_store::MemoryStore;
use crate::models::ChangesetReviewState;
use crate::sync::{SyncSummary, SyncWorker};
use crate::test_support::{
    epoch, manual_clock, one_file_diff, repo, FakeSource, FakeVisibility, HostCall,
};

const ADMIN: i64 = 7;
const OTHER_USER: i64 = 8;

struct Harness {
    store: Arc<MemoryStore>,
    source: Arc<FakeSource>,
    visibility: Arc<FakeVisibility>,
    clock: Arc<ManualClock>,
    service: CampaignService,
    worker: SyncWorker,
}

fn harness_with(config: CampaignsConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FakeSource::new());
    let visibility = Arc::new(FakeVisibility::new([1, 2, 3, 4]));
    let clock = manual_clock();
    let (queue, receiver) = SyncQueue::new(store.clone());
    let worker = SyncWorker::new(
        store.clone(),
        source.clone(),
        receiver,
        config.sync.clone(),
        clock.clone(),
    );
    let service = CampaignService::new(
        store.clone(),
        source.clone(),
        visibility.clone(),
        queue,
        config,
        clock.clone(),
    );

    Harness {
        store,
        source,
        visibility,
        clock,
        service,
        worker,
    }
}

fn harness() -> Harness {
    harness_with(CampaignsConfig {
        read_access_enabled: true,
        ..Default::default()
    })
}

fn admin() -> RequestContext {
    RequestContext::for_site_admin(ADMIN)
}

fn user_namespace(id: i64) -> String {
    marshal_id(EntityKind::User, id)
}

fn new_patch(repo_id: RepoId, file: &str) -> NewPatch {
    NewPatch {
        repo: repo(repo_id),
        base_ref: "refs/heads/main".to_string(),
        diff: one_file_diff(file),
    }
}

/// Stores a patch set with one patch per repository and returns its token.
async fn patch_set(h: &Harness, repos: &[RepoId]) -> String {
    let patches = repos
        .iter()
        .map(|id| new_patch(*id, &format!("file-{}.txt", id)))
        .collect();
    let (patch_set, _) = h.service.create_patch_set(&admin(), patches).await.unwrap();
    marshal_id(EntityKind::PatchSet, patch_set.id)
}

fn apply_args(patch_set: &str, campaign: Option<&Campaign>) -> ApplyCampaignArgs {
    ApplyCampaignArgs {
        namespace: user_namespace(ADMIN),
        patch_set: patch_set.to_string(),
        campaign: campaign.map(|c| marshal_id(EntityKind::Campaign, c.id)),
        name: "Bump dependencies".to_string(),
        description: Some("Automated dependency bump".to_string()),
        branch: Some("campaigns/bump".to_string()),
    }
}

fn token(campaign: &Campaign) -> String {
    marshal_id(EntityKind::Campaign, campaign.id)
}

async fn applied_campaign(h: &Harness, repos: &[RepoId]) -> Campaign {
    let patch_set = patch_set(h, repos).await;
    h.service
        .apply_campaign(&admin(), apply_args(&patch_set, None))
        .await
        .unwrap()
}

async fn changesets_of(h: &Harness, campaign: &Campaign) -> Vec<Changeset> {
    h.store
        .list_changesets(&ListChangesetsOpts {
            campaign_id: Some(campaign.id),
            ..Default::default()
        })
        .await
        .unwrap()
        .0
}

#[tokio::test]
async fn test_create_requires_site_admin() {
    let h = harness();
    let args = CreateCampaignArgs {
        namespace: user_namespace(OTHER_USER),
        name: "Cleanup".to_string(),
        ..Default::default()
    };

    let anonymous = h
        .service
        .create_campaign(&RequestContext::anonymous(), args.clone())
        .await;
    let user = h
        .service
        .create_campaign(&RequestContext::for_user(OTHER_USER), args)
        .await;

    assert!(matches!(anonymous, Err(CampaignsError::NotAuthenticated)));
    assert!(matches!(user, Err(CampaignsError::MustBeSiteAdmin)));
}

#[tokio::test]
async fn test_create_rejects_unresolvable_namespace() {
    let h = harness();
    let mut args = CreateCampaignArgs {
        namespace: marshal_id(EntityKind::Campaign, 3),
        name: "Cleanup".to_string(),
        ..Default::default()
    };

    let wrong_kind = h.service.create_campaign(&admin(), args.clone()).await;
    args.namespace = user_namespace(0);
    let zero = h.service.create_campaign(&admin(), args).await;

    assert!(matches!(wrong_kind, Err(CampaignsError::Validation(_))));
    assert!(matches!(zero, Err(CampaignsError::IdIsZero)));
}

#[tokio::test]
async fn test_create_builds_draft_campaign() {
    let h = harness();
    let patch_set = patch_set(&h, &[1]).await;

    let campaign = h
        .service
        .create_campaign(
            &admin(),
            CreateCampaignArgs {
                namespace: marshal_id(EntityKind::Org, 4),
                name: "Cleanup".to_string(),
                patch_set: Some(patch_set),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(campaign.state, CampaignState::Draft);
    assert_eq!(campaign.namespace, Namespace::Org(4));
    assert_eq!(campaign.author_id, ADMIN);
    assert!(campaign.patch_set_id.is_some());
    assert!(h.source.calls().is_empty());
}

#[tokio::test]
async fn test_apply_publishes_one_changeset_per_repository() {
    let mut h = harness();

    let campaign = applied_campaign(&h, &[1, 2, 3]).await;

    assert_eq!(campaign.state, CampaignState::Open);
    assert_eq!(
        h.source.calls(),
        vec![
            HostCall::Create("repo-1".to_string(), "101".to_string()),
            HostCall::Create("repo-2".to_string(), "102".to_string()),
            HostCall::Create("repo-3".to_string(), "103".to_string()),
        ]
    );
    let changesets = changesets_of(&h, &campaign).await;
    assert_eq!(changesets.len(), 3);
    assert!(changesets
        .iter()
        .all(|c| c.campaign_ids == vec![campaign.id] && c.title == "Bump dependencies"));

    let patch_set = h
        .store
        .get_patch_set(&GetPatchSetOpts {
            id: campaign.patch_set_id.unwrap(),
        })
        .await
        .unwrap();
    assert_eq!(patch_set.consumed_by, Some(campaign.id));

    let summary = h.worker.process_pending(&admin()).await;
    assert_eq!(summary, SyncSummary { synced: 3, failed: 0 });
}

#[tokio::test]
async fn test_reapplying_same_patch_set_has_no_side_effects() {
    let h = harness();
    let patch_set = patch_set(&h, &[1, 2]).await;
    let campaign = h
        .service
        .apply_campaign(&admin(), apply_args(&patch_set, None))
        .await
        .unwrap();
    let calls = h.source.calls();
    let before = h.store.snapshot();
    h.clock.advance(Duration::minutes(5));

    let again = h
        .service
        .apply_campaign(&admin(), apply_args(&patch_set, Some(&campaign)))
        .await
        .unwrap();

    assert_eq!(again, campaign);
    assert_eq!(h.source.calls(), calls);
    assert_eq!(h.store.snapshot(), before);
}

#[tokio::test]
async fn test_apply_reconciles_changesets_with_new_patch_set() {
    let h = harness();
    let campaign = applied_campaign(&h, &[1, 2, 4]).await;
    let (next, _) = h
        .service
        .create_patch_set(
            &admin(),
            vec![
                new_patch(2, "changed.txt"),
                new_patch(3, "file-3.txt"),
                new_patch(4, "file-4.txt"),
            ],
        )
        .await
        .unwrap();
    let next_token = marshal_id(EntityKind::PatchSet, next.id);

    let delta = h
        .service
        .compute_campaign_delta(&admin(), &apply_args(&next_token, Some(&campaign)))
        .await
        .unwrap();
    assert_eq!(
        delta.create.iter().map(|p| p.repo.id).collect::<Vec<_>>(),
        vec![3]
    );
    assert_eq!(
        delta.update.iter().map(|(c, _)| c.repo.id).collect::<Vec<_>>(),
        vec![2]
    );
    assert_eq!(
        delta.unchanged.iter().map(|(c, _)| c.repo.id).collect::<Vec<_>>(),
        vec![4]
    );
    assert_eq!(
        delta.close.iter().map(|c| c.repo.id).collect::<Vec<_>>(),
        vec![1]
    );

    h.service
        .apply_campaign(&admin(), apply_args(&next_token, Some(&campaign)))
        .await
        .unwrap();

    assert_eq!(
        h.source.calls()[3..].to_vec(),
        vec![
            HostCall::Create("repo-3".to_string(), "104".to_string()),
            HostCall::Update("repo-2".to_string(), "102".to_string()),
            HostCall::Close("repo-1".to_string(), "101".to_string()),
        ]
    );
    let attached = changesets_of(&h, &campaign).await;
    assert_eq!(
        attached.iter().map(|c| c.repo.id).collect::<Vec<_>>(),
        vec![2, 4, 3]
    );
    let patches = h
        .store
        .list_patches(&ListPatchesOpts {
            patch_set_id: Some(next.id),
            ..Default::default()
        })
        .await
        .unwrap()
        .0;
    assert!(attached
        .iter()
        .all(|c| patches.iter().any(|p| Some(p.id) == c.patch_id)));
    let updated = h
        .service
        .campaign_by_id(&admin(), &token(&campaign))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.patch_set_id, Some(next.id));
}

#[tokio::test]
async fn test_compute_delta_writes_nothing() {
    let h = harness();
    let patch_set = patch_set(&h, &[1, 2]).await;
    let before = h.store.snapshot();

    let delta = h
        .service
        .compute_campaign_delta(&admin(), &apply_args(&patch_set, None))
        .await
        .unwrap();

    assert_eq!(delta.create.len(), 2);
    assert!(h.source.calls().is_empty());
    assert_eq!(h.store.snapshot(), before);
}

#[tokio::test]
async fn test_apply_rejects_patch_set_of_another_campaign() {
    let h = harness();
    let patch_set = patch_set(&h, &[1]).await;
    h.service
        .apply_campaign(&admin(), apply_args(&patch_set, None))
        .await
        .unwrap();

    let result = h
        .service
        .apply_campaign(&admin(), apply_args(&patch_set, None))
        .await;

    assert!(
        matches!(result, Err(CampaignsError::Validation(ref m)) if m.contains("already applied"))
    );
}

#[tokio::test]
async fn test_apply_rejects_expired_patch_set() {
    let h = harness();
    let patch_set = patch_set(&h, &[1]).await;
    h.clock.advance(Duration::hours(169));

    let result = h
        .service
        .apply_campaign(&admin(), apply_args(&patch_set, None))
        .await;

    assert!(matches!(result, Err(CampaignsError::Validation(ref m)) if m.contains("expired")));
    assert!(h.source.calls().is_empty());
}

#[tokio::test]
async fn test_apply_requires_branch() {
    let h = harness();
    let patch_set = patch_set(&h, &[1]).await;
    let mut args = apply_args(&patch_set, None);
    args.branch = None;

    let result = h.service.apply_campaign(&admin(), args).await;

    assert!(matches!(result, Err(CampaignsError::Validation(_))));
}

#[tokio::test]
async fn test_apply_to_campaign_of_another_user() {
    let h = harness();
    let campaign = applied_campaign(&h, &[1]).await;
    let next = patch_set(&h, &[2]).await;

    let result = h
        .service
        .apply_campaign(
            &RequestContext::for_user(OTHER_USER),
            apply_args(&next, Some(&campaign)),
        )
        .await;

    assert!(matches!(result, Err(CampaignsError::Unauthorized(_))));
}

#[tokio::test]
async fn test_close_closes_exactly_the_open_changesets() {
    let mut h = harness();
    let campaign = applied_campaign(&h, &[1, 2, 3, 4]).await;
    h.source
        .put("repo-4", FakeSource::external("104", ChangesetState::Merged));
    h.worker.process_pending(&admin()).await;
    h.clock.advance(Duration::hours(1));
    let author = RequestContext::for_user(ADMIN);

    let closed = h
        .service
        .close_campaign(&author, &token(&campaign), true)
        .await
        .unwrap();

    assert_eq!(closed.state, CampaignState::Closed);
    assert_eq!(closed.closed_at, Some(epoch() + Duration::hours(1)));
    assert_eq!(h.source.closed(), vec!["101", "102", "103"]);

    let again = h
        .service
        .close_campaign(&author, &token(&campaign), true)
        .await;
    assert!(matches!(again, Err(CampaignsError::Validation(_))));
    assert_eq!(h.source.closed().len(), 3);
}

#[tokio::test]
async fn test_close_without_changesets_leaves_host_alone() {
    let h = harness();
    let campaign = applied_campaign(&h, &[1, 2]).await;

    h.service
        .close_campaign(&admin(), &token(&campaign), false)
        .await
        .unwrap();

    assert!(h.source.closed().is_empty());
}

#[tokio::test]
async fn test_close_continues_past_host_failures() {
    let h = harness();
    let campaign = applied_campaign(&h, &[1, 2, 3]).await;
    h.source.fail("102");

    let closed = h
        .service
        .close_campaign(&admin(), &token(&campaign), true)
        .await
        .unwrap();

    assert_eq!(closed.state, CampaignState::Closed);
    assert_eq!(h.source.closed(), vec!["101", "102", "103"]);
}

#[tokio::test]
async fn test_close_requires_open_campaign_and_author() {
    let h = harness();
    let draft = h
        .service
        .create_campaign(
            &admin(),
            CreateCampaignArgs {
                namespace: user_namespace(ADMIN),
                name: "Draft".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let not_open = h.service.close_campaign(&admin(), &token(&draft), false).await;
    let not_author = h
        .service
        .close_campaign(&RequestContext::for_user(OTHER_USER), &token(&draft), false)
        .await;
    let zero = h
        .service
        .close_campaign(&admin(), &marshal_id(EntityKind::Campaign, 0), false)
        .await;

    assert!(matches!(not_open, Err(CampaignsError::Validation(_))));
    assert!(matches!(not_author, Err(CampaignsError::Unauthorized(_))));
    assert!(matches!(zero, Err(CampaignsError::IdIsZero)));
}

#[tokio::test]
async fn test_delete_detaches_and_hides_campaign() {
    let h = harness();
    let campaign = applied_campaign(&h, &[1, 2]).await;
    let attached = changesets_of(&h, &campaign).await;

    h.service
        .delete_campaign(&admin(), &token(&campaign))
        .await
        .unwrap();

    assert_eq!(
        h.service
            .campaign_by_id(&admin(), &token(&campaign))
            .await
            .unwrap(),
        None
    );
    assert!(changesets_of(&h, &campaign).await.is_empty());
    for changeset in attached {
        let kept = h
            .store
            .get_changeset(&GetChangesetOpts { id: changeset.id })
            .await
            .unwrap();
        assert!(kept.campaign_ids.is_empty());
        assert_eq!(kept.patch_id, changeset.patch_id);
    }
    let listed = h
        .service
        .list_campaigns(&admin(), &ListCampaignsArgs::default())
        .await
        .unwrap();
    assert_eq!(listed.total_count, 0);

    let again = h.service.delete_campaign(&admin(), &token(&campaign)).await;
    assert!(matches!(again, Err(CampaignsError::Validation(_))));
}

#[tokio::test]
async fn test_move_renames_and_rehomes() {
    let h = harness();
    let campaign = applied_campaign(&h, &[1]).await;
    let author = RequestContext::for_user(ADMIN);

    let nothing = h
        .service
        .move_campaign(
            &author,
            MoveCampaignArgs {
                campaign: token(&campaign),
                ..Default::default()
            },
        )
        .await;
    let foreign_user = h
        .service
        .move_campaign(
            &author,
            MoveCampaignArgs {
                campaign: token(&campaign),
                new_namespace: Some(user_namespace(OTHER_USER)),
                ..Default::default()
            },
        )
        .await;
    let moved = h
        .service
        .move_campaign(
            &author,
            MoveCampaignArgs {
                campaign: token(&campaign),
                new_name: Some("Bump everything".to_string()),
                new_namespace: Some(marshal_id(EntityKind::Org, 2)),
            },
        )
        .await
        .unwrap();

    assert!(matches!(nothing, Err(CampaignsError::Validation(_))));
    assert!(matches!(foreign_user, Err(CampaignsError::Unauthorized(_))));
    assert_eq!(moved.name, "Bump everything");
    assert_eq!(moved.namespace, Namespace::Org(2));
}

#[tokio::test]
async fn test_apply_cannot_rehome_into_another_users_namespace() {
    let h = harness();
    let campaign = applied_campaign(&h, &[1]).await;
    let author = RequestContext::for_user(ADMIN);
    let next = patch_set(&h, &[1]).await;

    let mut foreign = apply_args(&next, Some(&campaign));
    foreign.namespace = user_namespace(OTHER_USER);
    let rejected = h.service.apply_campaign(&author, foreign).await;

    let mut org = apply_args(&next, Some(&campaign));
    org.namespace = marshal_id(EntityKind::Org, 2);
    let rehomed = h.service.apply_campaign(&author, org).await.unwrap();

    assert!(matches!(rejected, Err(CampaignsError::Unauthorized(_))));
    assert_eq!(rehomed.namespace, Namespace::Org(2));
    let stored = h
        .store
        .get_campaign(&GetCampaignOpts { id: campaign.id })
        .await
        .unwrap();
    assert_eq!(stored.namespace, Namespace::Org(2));
}

#[tokio::test]
async fn test_admin_apply_may_rehome_into_any_namespace() {
    let h = harness();
    let campaign = applied_campaign(&h, &[1]).await;
    let next = patch_set(&h, &[1]).await;

    let mut foreign = apply_args(&next, Some(&campaign));
    foreign.namespace = user_namespace(OTHER_USER);
    let rehomed = h.service.apply_campaign(&admin(), foreign).await.unwrap();

    assert_eq!(rehomed.namespace, Namespace::User(OTHER_USER));
}

#[tokio::test]
async fn test_enqueue_sync_rejects_zero_and_unknown_ids_alike() {
    let h = harness();

    let zero = h
        .service
        .enqueue_changeset_sync(&admin(), &marshal_id(EntityKind::Changeset, 0))
        .await
        .unwrap_err();
    let unknown = h
        .service
        .enqueue_changeset_sync(&admin(), &marshal_id(EntityKind::Changeset, 99))
        .await
        .unwrap_err();

    assert!(matches!(zero, CampaignsError::UnknownChangeset(_)));
    assert!(matches!(unknown, CampaignsError::UnknownChangeset(_)));
}

#[tokio::test]
async fn test_enqueue_sync_is_limited_to_campaign_authors() {
    let mut h = harness();
    let campaign = applied_campaign(&h, &[1]).await;
    h.worker.process_pending(&admin()).await;
    let changeset = &changesets_of(&h, &campaign).await[0];
    let changeset_token = marshal_id(EntityKind::Changeset, changeset.id);

    let stranger = h
        .service
        .enqueue_changeset_sync(&RequestContext::for_user(OTHER_USER), &changeset_token)
        .await;
    h.service
        .enqueue_changeset_sync(&RequestContext::for_user(ADMIN), &changeset_token)
        .await
        .unwrap();

    assert!(matches!(stranger, Err(CampaignsError::Unauthorized(_))));
    assert_eq!(h.worker.process_pending(&admin()).await.synced, 1);
}

#[tokio::test]
async fn test_reads_require_admin_unless_enabled() {
    let h = harness_with(CampaignsConfig::default());
    let campaign = applied_campaign(&h, &[1]).await;

    let user = h
        .service
        .campaign_by_id(&RequestContext::for_user(OTHER_USER), &token(&campaign))
        .await;
    let admin_view = h
        .service
        .campaign_by_id(&admin(), &token(&campaign))
        .await
        .unwrap();

    assert!(matches!(user, Err(CampaignsError::MustBeSiteAdmin)));
    assert_eq!(admin_view, Some(campaign));
}

#[tokio::test]
async fn test_zero_ids_read_as_absent() {
    let h = harness();

    assert_eq!(
        h.service
            .campaign_by_id(&admin(), &marshal_id(EntityKind::Campaign, 0))
            .await
            .unwrap(),
        None
    );
    assert_eq!(
        h.service
            .changeset_by_id(&admin(), &marshal_id(EntityKind::Changeset, 0))
            .await
            .unwrap(),
        None
    );
    assert!(matches!(
        h.service
            .campaign_by_id(&admin(), &marshal_id(EntityKind::Patch, 1))
            .await,
        Err(CampaignsError::InvalidId { .. })
    ));
}

#[tokio::test]
async fn test_changeset_in_invisible_repository_is_hidden() {
    let h = harness();
    let campaign = applied_campaign(&h, &[1, 2]).await;
    let changesets = changesets_of(&h, &campaign).await;
    h.visibility.set([1]);
    let viewer = RequestContext::for_user(OTHER_USER);

    let visible = h
        .service
        .changeset_by_id(&viewer, &marshal_id(EntityKind::Changeset, changesets[0].id))
        .await
        .unwrap()
        .unwrap();
    let hidden_token = marshal_id(EntityKind::Changeset, changesets[1].id);
    let hidden = h
        .service
        .changeset_by_id(&viewer, &hidden_token)
        .await
        .unwrap()
        .unwrap();

    assert!(visible.as_full().is_some());
    assert_eq!(hidden.as_hidden().map(|c| c.id), Some(changesets[1].id));
    assert!(h
        .service
        .changeset_events(&viewer, &hidden_token)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_campaign_changesets_masks_or_drops_by_filter() {
    let h = harness();
    let campaign = applied_campaign(&h, &[1, 2, 3]).await;
    h.visibility.set([1]);
    let viewer = RequestContext::for_user(OTHER_USER);

    let masked = h
        .service
        .campaign_changesets(
            &viewer,
            &token(&campaign),
            &ListChangesetsArgs {
                state: Some("OPEN".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let dropped = h
        .service
        .campaign_changesets(
            &viewer,
            &token(&campaign),
            &ListChangesetsArgs {
                review_state: Some(ChangesetReviewState::Pending.as_str().to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(masked.total_count, 3);
    assert_eq!(masked.hidden_count, 2);
    assert_eq!(dropped.total_count, 1);
    assert_eq!(dropped.nodes.len(), 1);
    assert!(dropped.nodes[0].as_full().is_some());
}

#[tokio::test]
async fn test_unsafe_filter_limits_after_dropping() {
    let h = harness();
    let campaign = applied_campaign(&h, &[1, 2, 3, 4]).await;
    h.visibility.set([3, 4]);

    let page = h
        .service
        .campaign_changesets(
            &RequestContext::for_user(OTHER_USER),
            &token(&campaign),
            &ListChangesetsArgs {
                first: Some(1),
                review_state: Some("PENDING".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(page.total_count, 2);
    assert_eq!(page.nodes.len(), 1);
    assert_eq!(page.nodes[0].as_full().map(|c| c.repo.id), Some(3));
}

#[tokio::test]
async fn test_list_campaigns_narrows_to_administrable() {
    let h = harness();
    applied_campaign(&h, &[1]).await;
    let args = ListCampaignsArgs {
        viewer_can_administer: Some(true),
        ..Default::default()
    };

    let stranger = h
        .service
        .list_campaigns(&RequestContext::for_user(OTHER_USER), &args)
        .await
        .unwrap();
    let author = h
        .service
        .list_campaigns(&RequestContext::for_user(ADMIN), &args)
        .await
        .unwrap();
    let bad_state = h
        .service
        .list_campaigns(
            &admin(),
            &ListCampaignsArgs {
                state: Some("DRAFT".to_string()),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(stranger.total_count, 0);
    assert_eq!(author.total_count, 1);
    assert!(h.service.viewer_can_administer(&RequestContext::for_user(ADMIN), &author.nodes[0]));
    assert!(matches!(bad_state, Err(CampaignsError::Validation(_))));
}

#[tokio::test]
async fn test_create_patch_set_computes_stats_and_expiry() {
    let h = harness();

    let (patch_set, patches) = h
        .service
        .create_patch_set(&admin(), vec![new_patch(1, "a.txt"), new_patch(2, "b.txt")])
        .await
        .unwrap();

    assert_eq!(patch_set.user_id, ADMIN);
    assert_eq!(patch_set.expires_at, epoch() + Duration::hours(168));
    assert!(patches
        .iter()
        .all(|p| p.diff_stat == Some(DiffStat::new(0, 1, 0))));
}

#[tokio::test]
async fn test_create_patch_set_rejects_bad_input() {
    let h = harness();
    let mut broken = new_patch(2, "b.txt");
    broken.diff = "--- a/b.txt\n+++ b/b.txt\n@@ nonsense\n".to_string();

    let duplicate = h
        .service
        .create_patch_set(&admin(), vec![new_patch(1, "a.txt"), new_patch(1, "b.txt")])
        .await;
    let unparsable = h.service.create_patch_set(&admin(), vec![broken]).await;

    assert!(matches!(duplicate, Err(CampaignsError::Validation(_))));
    assert!(matches!(unparsable, Err(CampaignsError::DiffParse(_))));
}

#[tokio::test]
async fn test_patch_set_views_skip_invisible_repositories() {
    let h = harness();
    let patch_set = patch_set(&h, &[1, 2, 3]).await;
    h.visibility.set([1, 3]);
    let viewer = RequestContext::for_user(OTHER_USER);

    let patches = h
        .service
        .patch_set_patches(&viewer, &patch_set, Some(1))
        .await
        .unwrap();
    let stat = h
        .service
        .patch_set_diff_stat(&viewer, &patch_set)
        .await
        .unwrap();

    assert_eq!(patches.total_count, 2);
    assert_eq!(patches.nodes.len(), 1);
    assert_eq!(patches.nodes[0].patch().repo.id, 1);
    assert_eq!(stat, DiffStat::new(0, 2, 0));
    assert!(h
        .service
        .patch_set_by_id(&viewer, &patch_set)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_campaign_diff_stat_follows_patch_set() {
    let h = harness();
    let campaign = applied_campaign(&h, &[1, 2]).await;

    let stat = h
        .service
        .campaign_diff_stat(&admin(), &token(&campaign))
        .await
        .unwrap();

    assert_eq!(stat, DiffStat::new(0, 2, 0));
}

#[tokio::test]
async fn test_cancelled_request_stops_before_writing() {
    let h = harness();
    let patch_set = patch_set(&h, &[1]).await;
    let ctx = admin();
    ctx.cancel.cancel();

    let result = h.service.apply_campaign(&ctx, apply_args(&patch_set, None)).await;

    assert!(matches!(result, Err(CampaignsError::Cancelled)));
    assert!(h.source.calls().is_empty());
}
