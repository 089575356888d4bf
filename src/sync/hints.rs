use super::{ChallengeSynchronizer, Ledger};
use crate::{
    crds::{ChallengeDescription, ChallengeHint, HintLedgerEntry},
    ctfd::Hint,
    error::Result,
};
use std::collections::HashSet;
use tracing::{debug, info};

impl ChallengeSynchronizer<'_> {
    /// Hints are tracked by their position in the definition. Same phases as
    /// challenges: cleanup, update, create, delete.
    pub(super) async fn sync_hints(
        &mut self,
        ledger: &mut Ledger,
        index: usize,
        definition: &ChallengeDescription,
    ) -> Result<()> {
        let challenge_id = ledger.entry(index).id;
        let desired = &definition.spec.hints;
        let remote = self.platform.list_hints(challenge_id).await?;
        let remote_ids: HashSet<i64> = remote.iter().map(|h| h.id).collect();

        if prune_hints(&mut ledger.entry_mut(index).hints, desired.len(), &remote_ids) {
            debug!(challenge_id, "Dropped stale hint entries");
            self.store.persist(ledger).await?;
        }

        for known in ledger.entry(index).hints.clone() {
            let Some(current) = remote.iter().find(|h| h.id == known.id) else {
                continue;
            };
            let wanted = &desired[known.index];
            if !matches_hint(current, wanted) {
                info!(challenge_id, hint = current.id, "Updating hint");
                let updated = Hint {
                    title: wanted.description.clone(),
                    content: wanted.description.clone(),
                    cost: wanted.cost,
                    ..current.clone()
                };
                self.platform.update_hint(&updated).await?;
                self.report.hints_updated += 1;
            }
        }

        for (position, wanted) in desired.iter().enumerate() {
            if ledger.entry(index).hints.iter().any(|h| h.index == position) {
                continue;
            }
            let created = self
                .platform
                .create_hint(&Hint {
                    challenge_id,
                    title: wanted.description.clone(),
                    content: wanted.description.clone(),
                    cost: wanted.cost,
                    ..Default::default()
                })
                .await?;
            self.report.hints_created += 1;
            info!(challenge_id, hint = created.id, position, "Created hint");

            ledger.entry_mut(index).hints.push(HintLedgerEntry {
                id: created.id,
                index: position,
            });
            self.store.persist(ledger).await?;
        }

        for hint in &remote {
            if !ledger.entry(index).hints.iter().any(|h| h.id == hint.id) {
                info!(challenge_id, hint = hint.id, "Deleting unmanaged hint");
                self.platform.delete_hint(hint.id).await?;
                self.report.hints_deleted += 1;
            }
        }

        Ok(())
    }
}

/// Drop entries pointing past the end of the definition, at missing remote
/// hints, or at an index already claimed.
fn prune_hints(entries: &mut Vec<HintLedgerEntry>, desired: usize, remote_ids: &HashSet<i64>) -> bool {
    let before = entries.len();
    let mut claimed = HashSet::new();
    entries.retain(|h| h.index < desired && remote_ids.contains(&h.id) && claimed.insert(h.index));
    entries.len() != before
}

/// Listings return the locked hint view without `content`, so only title and
/// cost can be compared.
fn matches_hint(current: &Hint, wanted: &ChallengeHint) -> bool {
    current.title == wanted.description && current.cost == wanted.cost
}
