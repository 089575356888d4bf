//! Three-way merge between ChallengeDescriptions, the ledger kept in the CTFd
//! status and the challenges that exist in the CTFd instance.
//!
//! A pass is divided in phases: cleanup of the ledger, update of known
//! challenges, creation of missing ones and deletion of orphans. Remote ids are
//! persisted right after every create, so an interrupted pass never leaks a
//! remote object the next pass cannot attribute.

mod flags;
mod hints;
mod ledger;


pub use ledger::{Ledger, LedgerStore, StatusLedgerStore};

use crate::{
    crds::{ChallengeDescription, ChallengeLedgerEntry},
    ctfd::{Challenge, ChallengeApi},
    error::Result,
};
use kube::ResourceExt;
use std::collections::HashSet;
use tracing::{debug, info, instrument};

/// Remote mutations issued during one pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub challenges_created: u64,
    pub challenges_updated: u64,
    pub challenges_deleted: u64,
    pub hints_created: u64,
    pub hints_updated: u64,
    pub hints_deleted: u64,
    pub flags_created: u64,
    pub flags_updated: u64,
    pub flags_deleted: u64,
}

impl SyncReport {
    pub fn mutations(&self) -> u64 {
        self.challenges_created
            + self.challenges_updated
            + self.challenges_deleted
            + self.hints_created
            + self.hints_updated
            + self.hints_deleted
            + self.flags_created
            + self.flags_updated
            + self.flags_deleted
    }
}

pub struct ChallengeSynchronizer<'a> {
    platform: &'a dyn ChallengeApi,
    store: &'a dyn LedgerStore,
    report: SyncReport,
}

impl<'a> ChallengeSynchronizer<'a> {
    pub fn new(platform: &'a dyn ChallengeApi, store: &'a dyn LedgerStore) -> Self {
        Self {
            platform,
            store,
            report: SyncReport::default(),
        }
    }

    /// Run one pass. The first remote failure aborts the pass; everything
    /// created up to that point is already recorded through the store.
    #[instrument(skip_all, fields(local = local.len(), known = ledger.len()))]
    pub async fn sync(
        mut self,
        local: &[ChallengeDescription],
        mut ledger: Ledger,
    ) -> Result<(Ledger, SyncReport)> {
        let remote = self.platform.list_challenges().await?;
        let remote_ids: HashSet<i64> = remote.iter().map(|c| c.id).collect();

        if ledger.prune(local, &remote_ids) {
            debug!("Dropped stale ledger entries");
            self.store.persist(&ledger).await?;
        }

        self.update_known(local, &mut ledger).await?;
        self.create_missing(local, &mut ledger).await?;

        for challenge in &remote {
            if !ledger.references(challenge.id) {
                info!(id = challenge.id, name = %challenge.name, "Deleting unmanaged challenge");
                self.platform.delete_challenge(challenge.id).await?;
                self.report.challenges_deleted += 1;
            }
        }

        Ok((ledger, self.report))
    }

    async fn update_known(&mut self, local: &[ChallengeDescription], ledger: &mut Ledger) -> Result<()> {
        for index in 0..ledger.len() {
            let entry = ledger.entry(index).clone();
            let Some(definition) = find_local(local, &entry.name, &entry.namespace) else {
                continue;
            };

            let current = self.platform.get_challenge(entry.id).await?;
            if !matches_definition(&current, definition) {
                info!(id = entry.id, name = %entry.name, "Updating challenge");
                let updated = Challenge {
                    id: current.id,
                    ..desired_challenge(definition)
                };
                self.platform.update_challenge(&updated).await?;
                self.report.challenges_updated += 1;
            }

            self.sync_children(ledger, index, definition).await?;
        }
        Ok(())
    }

    async fn create_missing(&mut self, local: &[ChallengeDescription], ledger: &mut Ledger) -> Result<()> {
        for definition in local {
            let (name, namespace) = identity(definition);
            if ledger.position(&name, &namespace).is_some() {
                continue;
            }

            let created = self
                .platform
                .create_challenge(&desired_challenge(definition))
                .await?;
            self.report.challenges_created += 1;
            info!(id = created.id, %name, %namespace, "Created challenge");

            let index = ledger.push(ChallengeLedgerEntry {
                id: created.id,
                name,
                namespace,
                hints: vec![],
            });
            self.store.persist(ledger).await?;

            self.sync_children(ledger, index, definition).await?;
        }
        Ok(())
    }

    async fn sync_children(
        &mut self,
        ledger: &mut Ledger,
        index: usize,
        definition: &ChallengeDescription,
    ) -> Result<()> {
        self.sync_hints(ledger, index, definition).await?;
        self.sync_flag(ledger.entry(index).id, definition).await
    }
}

fn identity(definition: &ChallengeDescription) -> (String, String) {
    (
        definition.name_any(),
        definition.namespace().unwrap_or_default(),
    )
}

fn find_local<'d>(
    local: &'d [ChallengeDescription],
    name: &str,
    namespace: &str,
) -> Option<&'d ChallengeDescription> {
    local.iter().find(|d| {
        let (n, ns) = identity(d);
        n == name && ns == namespace
    })
}

fn desired_challenge(definition: &ChallengeDescription) -> Challenge {
    Challenge {
        name: definition.spec.title.clone(),
        description: definition.spec.description.clone(),
        value: definition.spec.value,
        category: definition.spec.category.clone(),
        ..Default::default()
    }
}

fn matches_definition(current: &Challenge, definition: &ChallengeDescription) -> bool {
    current.name == definition.spec.title
        && current.description == definition.spec.description
        && current.value == definition.spec.value
        && current.category == definition.spec.category
}
