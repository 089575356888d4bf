use crate::{
    crds::{CTFd, ChallengeDescription, ChallengeLedgerEntry},
    error::{Error, Result},
};
use async_trait::async_trait;
use kube::{
    api::{Api, Patch, PatchParams},
    Client, ResourceExt,
};
use std::collections::HashSet;

/// In-memory copy of the bookkeeping that maps ChallengeDescriptions to remote
/// challenge ids. Flushed through a [`LedgerStore`] at checkpoints.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ledger {
    entries: Vec<ChallengeLedgerEntry>,
}

impl Ledger {
    pub fn new(entries: Vec<ChallengeLedgerEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ChallengeLedgerEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ChallengeLedgerEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn position(&self, name: &str, namespace: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name == name && e.namespace == namespace)
    }

    pub fn references(&self, remote_id: i64) -> bool {
        self.entries.iter().any(|e| e.id == remote_id)
    }

    pub(super) fn entry(&self, index: usize) -> &ChallengeLedgerEntry {
        &self.entries[index]
    }

    pub(super) fn entry_mut(&mut self, index: usize) -> &mut ChallengeLedgerEntry {
        &mut self.entries[index]
    }

    pub(super) fn push(&mut self, entry: ChallengeLedgerEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    /// Drop entries whose definition is gone or whose remote challenge no longer
    /// exists, and duplicates of a definition. Returns whether anything was dropped.
    pub fn prune(&mut self, local: &[ChallengeDescription], remote_ids: &HashSet<i64>) -> bool {
        let before = self.entries.len();
        let mut seen = HashSet::new();
        self.entries.retain(|entry| {
            local_exists(local, &entry.name, &entry.namespace)
                && remote_ids.contains(&entry.id)
                && seen.insert((entry.name.clone(), entry.namespace.clone()))
        });
        self.entries.len() != before
    }
}

fn local_exists(local: &[ChallengeDescription], name: &str, namespace: &str) -> bool {
    local
        .iter()
        .any(|d| d.name_any() == name && d.namespace().as_deref().unwrap_or_default() == namespace)
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn persist(&self, ledger: &Ledger) -> Result<()>;
}

/// Persists the ledger in `status.challengeDescriptions` of a CTFd.
pub struct StatusLedgerStore {
    api: Api<CTFd>,
    name: String,
}

impl StatusLedgerStore {
    pub fn new(client: Client, ctfd: &CTFd) -> Result<Self> {
        let namespace = ctfd
            .namespace()
            .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
        Ok(Self {
            api: Api::namespaced(client, &namespace),
            name: ctfd.name_any(),
        })
    }
}

#[async_trait]
impl LedgerStore for StatusLedgerStore {
    async fn persist(&self, ledger: &Ledger) -> Result<()> {
        let patch = serde_json::json!({
            "status": {
                "challengeDescriptions": ledger.entries()
            }
        });
        self.api
            .patch_status(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
