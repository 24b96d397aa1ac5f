//! An in-process [`Store`] keeping every table in memory.
//!
//! Used by the command line tools and by tests. The whole state can be
//! exported to and restored from a [`Snapshot`].

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{
    Campaign, CampaignId, Changeset, ChangesetEvent, ChangesetId, Patch, PatchId, PatchSet,
};
use crate::store::{
    ChangesetSyncUpdate, GetCampaignOpts, GetChangesetOpts, GetPatchSetOpts, ListCampaignsOpts,
    ListChangesetsOpts, ListPatchesOpts, Store, StoreError,
};

#[cfg(test)]
#[path = "memory_store_tests.rs"]
mod tests;

/// A serializable copy of every row in a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub campaigns: Vec<Campaign>,

    #[serde(default)]
    pub changesets: Vec<Changeset>,

    #[serde(default)]
    pub patch_sets: Vec<PatchSet>,

    #[serde(default)]
    pub patches: Vec<Patch>,

    #[serde(default)]
    pub events: Vec<ChangesetEvent>,
}

#[derive(Debug, Default)]
struct Tables {
    campaigns: BTreeMap<i64, Campaign>,
    changesets: BTreeMap<i64, Changeset>,
    patch_sets: BTreeMap<i64, PatchSet>,
    patches: BTreeMap<i64, Patch>,
    events: BTreeMap<i64, ChangesetEvent>,
    last_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut tables = Tables::default();
        let ids = snapshot
            .campaigns
            .iter()
            .map(|c| c.id)
            .chain(snapshot.changesets.iter().map(|c| c.id))
            .chain(snapshot.patch_sets.iter().map(|p| p.id))
            .chain(snapshot.patches.iter().map(|p| p.id))
            .chain(snapshot.events.iter().map(|e| e.id));
        tables.last_id = ids.max().unwrap_or(0);

        tables.campaigns = snapshot.campaigns.into_iter().map(|c| (c.id, c)).collect();
        tables.changesets = snapshot.changesets.into_iter().map(|c| (c.id, c)).collect();
        tables.patch_sets = snapshot.patch_sets.into_iter().map(|p| (p.id, p)).collect();
        tables.patches = snapshot.patches.into_iter().map(|p| (p.id, p)).collect();
        tables.events = snapshot.events.into_iter().map(|e| (e.id, e)).collect();

        MemoryStore {
            tables: Mutex::new(tables),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let tables = self.lock();
        Snapshot {
            campaigns: tables.campaigns.values().cloned().collect(),
            changesets: tables.changesets.values().cloned().collect(),
            patch_sets: tables.patch_sets.values().cloned().collect(),
            patches: tables.patches.values().cloned().collect(),
            events: tables.events.values().cloned().collect(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn limited<T>(items: Vec<T>, limit: Option<usize>) -> (Vec<T>, usize) {
    let total = items.len();
    let items = match limit {
        Some(limit) => items.into_iter().take(limit).collect(),
        None => items,
    };
    (items, total)
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_campaign(&self, opts: &GetCampaignOpts) -> Result<Campaign, StoreError> {
        self.lock()
            .campaigns
            .get(&opts.id)
            .cloned()
            .ok_or(StoreError::NoResults)
    }

    async fn list_campaigns(
        &self,
        opts: &ListCampaignsOpts,
    ) -> Result<(Vec<Campaign>, usize), StoreError> {
        let tables = self.lock();
        let member_of = opts.changeset_id.map(|id| {
            tables
                .changesets
                .get(&id)
                .map(|c| c.campaign_ids.clone())
                .unwrap_or_default()
        });

        let matching = tables
            .campaigns
            .values()
            .filter(|c| opts.state.matches(c.state))
            .filter(|c| opts.only_for_author.map_or(true, |a| c.author_id == a))
            .filter(|c| member_of.as_ref().map_or(true, |ids| ids.contains(&c.id)))
            .cloned()
            .collect();

        Ok(limited(matching, opts.limit))
    }

    async fn create_campaign(&self, mut campaign: Campaign) -> Result<Campaign, StoreError> {
        let mut tables = self.lock();
        campaign.id = tables.next_id();
        tables.campaigns.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn update_campaign(&self, campaign: &Campaign) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let stored = tables
            .campaigns
            .get_mut(&campaign.id)
            .ok_or(StoreError::NoResults)?;
        *stored = campaign.clone();
        Ok(())
    }

    async fn get_changeset(&self, opts: &GetChangesetOpts) -> Result<Changeset, StoreError> {
        self.lock()
            .changesets
            .get(&opts.id)
            .cloned()
            .ok_or(StoreError::NoResults)
    }

    async fn list_changesets(
        &self,
        opts: &ListChangesetsOpts,
    ) -> Result<(Vec<Changeset>, usize), StoreError> {
        let tables = self.lock();
        let matching = tables
            .changesets
            .values()
            .filter(|c| opts.campaign_id.map_or(true, |id| c.campaign_ids.contains(&id)))
            .filter(|c| opts.ids.as_ref().map_or(true, |ids| ids.contains(&c.id)))
            .filter(|c| opts.state.map_or(true, |s| c.state == s))
            .filter(|c| opts.review_state.map_or(true, |s| c.review_state == s))
            .filter(|c| opts.check_state.map_or(true, |s| c.check_state == s))
            .filter(|c| {
                opts.due_before
                    .map_or(true, |due| c.next_sync_at.is_some_and(|at| at <= due))
            })
            .cloned()
            .collect();

        Ok(limited(matching, opts.limit))
    }

    async fn create_changeset(&self, mut changeset: Changeset) -> Result<Changeset, StoreError> {
        let mut tables = self.lock();
        if let Some(external_id) = &changeset.external_id {
            let duplicate = tables.changesets.values().any(|c| {
                c.repo.id == changeset.repo.id && c.external_id.as_ref() == Some(external_id)
            });
            if duplicate {
                return Err(StoreError::Conflict(format!(
                    "changeset {} already exists in {}",
                    external_id, changeset.repo
                )));
            }
        }

        changeset.id = tables.next_id();
        tables.changesets.insert(changeset.id, changeset.clone());
        Ok(changeset)
    }

    async fn update_changeset_sync(
        &self,
        id: ChangesetId,
        update: &ChangesetSyncUpdate,
    ) -> Result<Changeset, StoreError> {
        let mut tables = self.lock();
        let changeset = tables.changesets.get_mut(&id).ok_or(StoreError::NoResults)?;

        changeset.state = update.state;
        changeset.review_state = update.review_state;
        changeset.check_state = update.check_state;
        changeset.title = update.title.clone();
        changeset.body = update.body.clone();
        changeset.external_updated_at = update.external_updated_at;
        changeset.next_sync_at = update.next_sync_at;
        changeset.updated_at = chrono::Utc::now();

        Ok(changeset.clone())
    }

    async fn update_changeset_links(
        &self,
        id: ChangesetId,
        campaign_ids: &[CampaignId],
        patch_id: Option<PatchId>,
    ) -> Result<Changeset, StoreError> {
        let mut tables = self.lock();
        let changeset = tables.changesets.get_mut(&id).ok_or(StoreError::NoResults)?;

        changeset.campaign_ids = campaign_ids.to_vec();
        changeset.patch_id = patch_id;
        changeset.updated_at = chrono::Utc::now();

        Ok(changeset.clone())
    }

    async fn get_patch_set(&self, opts: &GetPatchSetOpts) -> Result<PatchSet, StoreError> {
        self.lock()
            .patch_sets
            .get(&opts.id)
            .cloned()
            .ok_or(StoreError::NoResults)
    }

    async fn create_patch_set(
        &self,
        mut patch_set: PatchSet,
        patches: Vec<Patch>,
    ) -> Result<(PatchSet, Vec<Patch>), StoreError> {
        let mut tables = self.lock();
        patch_set.id = tables.next_id();
        tables.patch_sets.insert(patch_set.id, patch_set.clone());

        let mut stored = Vec::with_capacity(patches.len());
        for mut patch in patches {
            patch.id = tables.next_id();
            patch.patch_set_id = patch_set.id;
            tables.patches.insert(patch.id, patch.clone());
            stored.push(patch);
        }

        Ok((patch_set, stored))
    }

    async fn update_patch_set(&self, patch_set: &PatchSet) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let stored = tables
            .patch_sets
            .get_mut(&patch_set.id)
            .ok_or(StoreError::NoResults)?;

        if let Some(owner) = stored.consumed_by {
            if patch_set.consumed_by != Some(owner) || *stored != *patch_set {
                return Err(StoreError::Conflict(format!(
                    "patch set {} was consumed by campaign {}",
                    patch_set.id, owner
                )));
            }
        }

        *stored = patch_set.clone();
        Ok(())
    }

    async fn get_patch(&self, id: PatchId) -> Result<Patch, StoreError> {
        self.lock()
            .patches
            .get(&id)
            .cloned()
            .ok_or(StoreError::NoResults)
    }

    async fn list_patches(
        &self,
        opts: &ListPatchesOpts,
    ) -> Result<(Vec<Patch>, usize), StoreError> {
        let tables = self.lock();
        let matching = tables
            .patches
            .values()
            .filter(|p| opts.patch_set_id.map_or(true, |id| p.patch_set_id == id))
            .map(|p| {
                let mut patch = p.clone();
                if opts.no_diff {
                    patch.diff.clear();
                }
                patch
            })
            .collect();

        Ok(limited(matching, opts.limit))
    }

    async fn list_changeset_events(
        &self,
        changeset_id: ChangesetId,
    ) -> Result<Vec<ChangesetEvent>, StoreError> {
        let tables = self.lock();
        let mut events: Vec<ChangesetEvent> = tables
            .events
            .values()
            .filter(|e| e.changeset_id == changeset_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.created_at, e.id));
        Ok(events)
    }

    async fn create_changeset_events(
        &self,
        events: Vec<ChangesetEvent>,
    ) -> Result<Vec<ChangesetEvent>, StoreError> {
        let mut tables = self.lock();
        for event in &events {
            let duplicate = tables
                .events
                .values()
                .any(|e| e.changeset_id == event.changeset_id && e.key == event.key);
            if duplicate {
                return Err(StoreError::Conflict(format!(
                    "event {} already recorded for changeset {}",
                    event.key, event.changeset_id
                )));
            }
        }

        let mut stored = Vec::with_capacity(events.len());
        for mut event in events {
            event.id = tables.next_id();
            tables.events.insert(event.id, event.clone());
            stored.push(event);
        }
        Ok(stored)
    }
}
