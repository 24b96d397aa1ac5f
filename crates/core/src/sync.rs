//! # Synchronization Queue
//!
//! Changesets are copies of state owned by code hosts. The [`SyncWorker`]
//! keeps them fresh: it pulls the authoritative state of each changeset from
//! its host and writes state, review state, check state and the next sync time
//! back to the store. It is the only writer of those fields.
//!
//! Work arrives in two ways:
//! - explicitly, through [`SyncQueue::enqueue`], which returns as soon as the
//!   id is queued;
//! - on a timer, for every changeset whose `next_sync_at` has passed.
//!
//! A failed sync is logged and leaves `next_sync_at` untouched, so the
//! changeset is picked up again by the next scheduling pass.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use campaigns_developer_platforms::errors::Error as PlatformError;
use campaigns_developer_platforms::ChangesetSource;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SyncConfig;
use crate::context::{Clock, RequestContext};
use crate::errors::CampaignsError;
use crate::models::{Changeset, ChangesetEvent, ChangesetId, ChangesetState};
use crate::store::{ChangesetSyncUpdate, GetChangesetOpts, ListChangesetsOpts, Store, StoreError};

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;

/// Computes when a changeset should be synced next.
///
/// Changesets that changed recently are synced often, quiet ones rarely: the
/// delay equals the time between the last change on the host and
/// `last_sync`, bounded by the configured minimum and maximum. Without any
/// known change the minimum delay is used.
///
/// # Examples
///
/// ```
/// use campaigns_core::config::SyncConfig;
/// use campaigns_core::sync::next_sync;
/// use chrono::{Duration, Utc};
///
/// let config = SyncConfig::default();
/// let now = Utc::now();
///
/// let next = next_sync(now, Some(now - Duration::minutes(30)), &config);
/// assert_eq!(next, now + Duration::minutes(30));
///
/// let quiet = next_sync(now, Some(now - Duration::days(30)), &config);
/// assert_eq!(quiet, now + Duration::hours(8));
/// ```
pub fn next_sync(
    last_sync: DateTime<Utc>,
    last_change: Option<DateTime<Utc>>,
    config: &SyncConfig,
) -> DateTime<Utc> {
    let min = config.min_sync_delay();
    let max = config.max_sync_delay();

    let delay = match last_change {
        // An inverted config resolves to the maximum delay instead of panicking.
        Some(changed) => (last_sync - changed).max(min).min(max),
        None => min,
    };

    last_sync + delay
}

/// The handle used to request changeset syncs.
///
/// Cloning is cheap; all clones feed the same worker.
#[derive(Clone)]
pub struct SyncQueue {
    store: Arc<dyn Store>,
    sender: mpsc::UnboundedSender<ChangesetId>,
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl SyncQueue {
    /// Creates a queue and the receiving end to hand to a [`SyncWorker`].
    pub fn new(store: Arc<dyn Store>) -> (Self, mpsc::UnboundedReceiver<ChangesetId>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (SyncQueue { store, sender }, receiver)
    }

    /// Schedules a sync of one changeset without waiting for it.
    ///
    /// # Errors
    ///
    /// The zero id and ids without a stored changeset are both rejected with
    /// [`CampaignsError::UnknownChangeset`]. Returns
    /// [`CampaignsError::QueueClosed`] when the worker has stopped.
    #[instrument(skip(self, ctx), err)]
    pub async fn enqueue(&self, ctx: &RequestContext, id: ChangesetId) -> Result<(), CampaignsError> {
        if id == 0 {
            return Err(CampaignsError::UnknownChangeset(id));
        }

        match ctx.guard(self.store.get_changeset(&GetChangesetOpts { id })).await? {
            Ok(_) => {}
            Err(StoreError::NoResults) => return Err(CampaignsError::UnknownChangeset(id)),
            Err(e) => return Err(CampaignsError::store("get_changeset")(e)),
        }

        self.sender
            .send(id)
            .map_err(|_| CampaignsError::QueueClosed)?;
        debug!(changeset_id = id, "Queued changeset sync");
        Ok(())
    }

    /// Queues every changeset whose `next_sync_at` is at or before `now`.
    ///
    /// Returns how many changesets were queued.
    pub async fn enqueue_due(
        &self,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<usize, CampaignsError> {
        let (due, _) = ctx
            .guard(self.store.list_changesets(&ListChangesetsOpts {
                due_before: Some(now),
                ..Default::default()
            }))
            .await?
            .map_err(CampaignsError::store("list_changesets"))?;

        for changeset in &due {
            self.sender
                .send(changeset.id)
                .map_err(|_| CampaignsError::QueueClosed)?;
        }

        Ok(due.len())
    }
}

/// The outcome of one batch of syncs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub synced: usize,
    pub failed: usize,
}

/// Pulls changeset state from code hosts into the store.
pub struct SyncWorker {
    store: Arc<dyn Store>,
    source: Arc<dyn ChangesetSource>,
    receiver: mpsc::UnboundedReceiver<ChangesetId>,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SyncWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncWorker")
            .field("config", &self.config)
            .finish()
    }
}

impl SyncWorker {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn ChangesetSource>,
        receiver: mpsc::UnboundedReceiver<ChangesetId>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        SyncWorker {
            store,
            source,
            receiver,
            config,
            clock,
        }
    }

    /// Processes queued ids and due changesets until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let ctx = RequestContext::anonymous().with_cancellation(cancel.clone());
        let mut schedule = tokio::time::interval(self.config.schedule_interval());
        info!(
            interval_seconds = self.config.schedule_interval_seconds,
            "Starting changeset sync worker"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(id) = self.receiver.recv() => {
                    let mut batch = BTreeSet::from([id]);
                    while let Ok(id) = self.receiver.try_recv() {
                        batch.insert(id);
                    }
                    self.sync_batch(&ctx, batch).await;
                }
                _ = schedule.tick() => {
                    if let Err(e) = self.sync_due(&ctx).await {
                        error!(error = e.to_string(), "Failed to list changesets due for sync");
                    }
                }
            }
        }

        info!("Stopped changeset sync worker");
    }

    /// Syncs every id queued so far, each at most once.
    pub async fn process_pending(&mut self, ctx: &RequestContext) -> SyncSummary {
        let mut batch = BTreeSet::new();
        while let Ok(id) = self.receiver.try_recv() {
            batch.insert(id);
        }
        self.sync_batch(ctx, batch).await
    }

    /// Syncs every changeset whose `next_sync_at` has passed.
    pub async fn sync_due(&self, ctx: &RequestContext) -> Result<SyncSummary, CampaignsError> {
        let (due, _) = ctx
            .guard(self.store.list_changesets(&ListChangesetsOpts {
                due_before: Some(self.clock.now()),
                ..Default::default()
            }))
            .await?
            .map_err(CampaignsError::store("list_changesets"))?;

        let ids: Vec<ChangesetId> = due.iter().map(|c| c.id).collect();
        Ok(self.sync_batch(ctx, ids).await)
    }

    /// Syncs every published changeset that is not deleted, due or not.
    pub async fn sync_all(&self, ctx: &RequestContext) -> Result<SyncSummary, CampaignsError> {
        let (all, _) = ctx
            .guard(self.store.list_changesets(&ListChangesetsOpts::default()))
            .await?
            .map_err(CampaignsError::store("list_changesets"))?;

        let ids: Vec<ChangesetId> = all
            .iter()
            .filter(|c| c.external_id.is_some() && c.state != ChangesetState::Deleted)
            .map(|c| c.id)
            .collect();
        Ok(self.sync_batch(ctx, ids).await)
    }

    async fn sync_batch(
        &self,
        ctx: &RequestContext,
        ids: impl IntoIterator<Item = ChangesetId> + Send,
    ) -> SyncSummary {
        let mut summary = SyncSummary::default();

        for id in ids {
            match self.sync_changeset(ctx, id).await {
                Ok(_) => summary.synced += 1,
                Err(CampaignsError::Cancelled) => {
                    debug!(changeset_id = id, "Sync batch cancelled");
                    break;
                }
                Err(e) => {
                    warn!(
                        changeset_id = id,
                        error = e.to_string(),
                        "Failed to sync changeset, will retry on the next pass"
                    );
                    summary.failed += 1;
                }
            }
        }

        if summary.synced + summary.failed > 0 {
            info!(
                synced = summary.synced,
                failed = summary.failed,
                "Finished changeset sync batch"
            );
        }
        summary
    }

    /// Refreshes one changeset from its code host.
    ///
    /// New review and CI events are appended before the changeset row is
    /// updated. A changeset its host no longer knows is marked deleted and no
    /// longer scheduled.
    #[instrument(skip(self, ctx), err)]
    pub async fn sync_changeset(
        &self,
        ctx: &RequestContext,
        id: ChangesetId,
    ) -> Result<Changeset, CampaignsError> {
        let changeset = ctx
            .guard(self.store.get_changeset(&GetChangesetOpts { id }))
            .await?
            .map_err(|e| match e {
                StoreError::NoResults => CampaignsError::UnknownChangeset(id),
                e => CampaignsError::store("get_changeset")(e),
            })?;

        let Some(external_id) = changeset.external_id.as_deref() else {
            return Err(CampaignsError::Validation(format!(
                "changeset {} was never published",
                id
            )));
        };

        let loaded = ctx
            .guard(
                self.source
                    .load_changeset(&changeset.repo.owner, &changeset.repo.name, external_id),
            )
            .await?;
        let now = self.clock.now();

        let update = match loaded {
            Ok(external) => {
                self.append_new_events(ctx, id, &external.events).await?;

                let last_change = external
                    .latest_event_at()
                    .map_or(external.updated_at, |at| at.max(external.updated_at));
                ChangesetSyncUpdate {
                    state: external.state,
                    review_state: external.review_state,
                    check_state: external.check_state,
                    title: external.title,
                    body: external.body,
                    external_updated_at: Some(external.updated_at),
                    next_sync_at: match external.state {
                        ChangesetState::Deleted => None,
                        _ => Some(next_sync(now, Some(last_change), &self.config)),
                    },
                }
            }
            Err(PlatformError::ChangesetNotFound(..)) => {
                info!(
                    changeset_id = id,
                    repository = %changeset.repo,
                    external_id = external_id,
                    "Changeset no longer exists on its code host"
                );
                ChangesetSyncUpdate {
                    state: ChangesetState::Deleted,
                    review_state: changeset.review_state,
                    check_state: changeset.check_state,
                    title: changeset.title.clone(),
                    body: changeset.body.clone(),
                    external_updated_at: changeset.external_updated_at,
                    next_sync_at: None,
                }
            }
            Err(e) => return Err(CampaignsError::code_host("load_changeset")(e)),
        };

        let updated = ctx
            .guard(self.store.update_changeset_sync(id, &update))
            .await?
            .map_err(CampaignsError::store("update_changeset_sync"))?;

        debug!(
            changeset_id = id,
            state = %updated.state,
            review_state = %updated.review_state,
            check_state = %updated.check_state,
            "Synced changeset"
        );
        Ok(updated)
    }

    async fn append_new_events(
        &self,
        ctx: &RequestContext,
        changeset_id: ChangesetId,
        events: &[campaigns_developer_platforms::models::ExternalEvent],
    ) -> Result<(), CampaignsError> {
        if events.is_empty() {
            return Ok(());
        }

        let existing = ctx
            .guard(self.store.list_changeset_events(changeset_id))
            .await?
            .map_err(CampaignsError::store("list_changeset_events"))?;
        let seen: HashSet<&str> = existing.iter().map(|e| e.key.as_str()).collect();

        let fresh: Vec<ChangesetEvent> = events
            .iter()
            .filter(|e| !seen.contains(e.key.as_str()))
            .map(|e| ChangesetEvent {
                id: 0,
                changeset_id,
                key: e.key.clone(),
                kind: e.kind.clone(),
                created_at: e.created_at,
                payload: e.payload.clone(),
            })
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }

        let count = fresh.len();
        ctx.guard(self.store.create_changeset_events(fresh))
            .await?
            .map_err(CampaignsError::store("create_changeset_events"))?;
        debug!(changeset_id, count, "Appended changeset events");
        Ok(())
    }
}
