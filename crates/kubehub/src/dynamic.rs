//! The set of kinds that components may belong to.
//!
//! Kinds are registered as they are discovered and resolved to listable API
//! resources. Entries are never removed; a kind the API server stops serving
//! is kept as unserved and skipped. Readers always get an immutable snapshot;
//! writers publish a new snapshot and bump the epoch that watchers follow.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use kube::core::{ApiResource, GroupVersionKind};
use metrics::gauge;
use opdisco_core::gvk_key;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub enum KindState {
    /// Registered, not yet resolved by discovery.
    Pending,
    /// Resolved to an API resource supporting list and watch.
    Informable(ApiResource),
    /// Not served with list and watch, or superseded by a newer preferred
    /// version. Skipped when listing.
    Unserved,
    /// Resolution failed for a reason that may clear up, e.g. discovery
    /// itself was unavailable. Listing is refused until it resolves.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct KindEntry {
    pub gvk: GroupVersionKind,
    pub state: KindState,
}

impl KindEntry {
    pub fn resource(&self) -> Option<&ApiResource> {
        match &self.state {
            KindState::Informable(ar) => Some(ar),
            _ => None,
        }
    }
}

/// Immutable snapshot of the kind set.
#[derive(Debug, Clone, Default)]
pub struct KindSet {
    pub epoch: u64,
    entries: BTreeMap<String, KindEntry>,
}

impl KindSet {
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn get(&self, key: &str) -> Option<&KindEntry> { self.entries.get(key) }
    pub fn entries(&self) -> impl Iterator<Item = (&String, &KindEntry)> { self.entries.iter() }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum KindError {
    /// A registered kind cannot currently be listed. Retrying later may succeed.
    #[error("kind {kind} cannot be resolved: {reason}")]
    Transient { kind: String, reason: String },
}

pub struct DynamicKindSource {
    set: ArcSwap<KindSet>,
    epoch_tx: watch::Sender<u64>,
}

impl Default for DynamicKindSource {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Debug for DynamicKindSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.set.load();
        f.debug_struct("DynamicKindSource").field("epoch", &snap.epoch).field("kinds", &snap.len()).finish()
    }
}

impl DynamicKindSource {
    pub fn new() -> Self {
        let (epoch_tx, _) = watch::channel(0u64);
        Self { set: ArcSwap::from_pointee(KindSet::default()), epoch_tx }
    }

    pub fn snapshot(&self) -> Arc<KindSet> { self.set.load_full() }

    /// Receiver that changes whenever the set changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> { self.epoch_tx.subscribe() }

    /// Register a kind awaiting resolution. No-op if already known.
    pub fn register(&self, gvk: GroupVersionKind) -> bool {
        let key = gvk_key(&gvk);
        let changed = self.upsert(&key, |cur| match cur {
            Some(_) => None,
            None => Some(KindEntry { gvk: gvk.clone(), state: KindState::Pending }),
        });
        if changed {
            debug!(kind = %key, "kind registered");
        }
        changed
    }

    /// Mark a kind informable, registering it first if needed.
    pub fn activate(&self, resource: ApiResource) -> bool {
        let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
        let key = gvk_key(&gvk);
        let changed = self.upsert(&key, |cur| match cur {
            Some(KindEntry { state: KindState::Informable(_), .. }) => None,
            _ => Some(KindEntry { gvk: gvk.clone(), state: KindState::Informable(resource.clone()) }),
        });
        if changed {
            info!(kind = %key, "kind informable");
        }
        changed
    }

    /// Record that a registered kind is not served with list and watch. It
    /// stays registered and becomes informable again once served.
    pub fn mark_unserved(&self, gvk: &GroupVersionKind) -> bool {
        let key = gvk_key(gvk);
        let changed = self.upsert(&key, |cur| match cur {
            Some(entry) if !matches!(entry.state, KindState::Unserved) => {
                Some(KindEntry { gvk: entry.gvk.clone(), state: KindState::Unserved })
            }
            _ => None,
        });
        if changed {
            warn!(kind = %key, "kind not served; no longer listed");
        }
        changed
    }

    /// Record that a registered kind could not be resolved. Unknown kinds are ignored.
    pub fn mark_failed(&self, gvk: &GroupVersionKind, reason: &str) -> bool {
        let key = gvk_key(gvk);
        let changed = self.upsert(&key, |cur| match cur {
            Some(entry) if !matches!(&entry.state, KindState::Failed(r) if r == reason) => {
                Some(KindEntry { gvk: entry.gvk.clone(), state: KindState::Failed(reason.to_string()) })
            }
            _ => None,
        });
        if changed {
            warn!(kind = %key, reason, "kind cannot be resolved");
        }
        changed
    }

    /// Mark every still-pending kind failed. Used when discovery itself fails.
    pub fn fail_pending(&self, reason: &str) -> usize {
        let pending: Vec<GroupVersionKind> = self
            .set
            .load()
            .entries
            .values()
            .filter(|e| matches!(e.state, KindState::Pending))
            .map(|e| e.gvk.clone())
            .collect();
        pending.iter().filter(|gvk| self.mark_failed(gvk, reason)).count()
    }

    /// Every registered kind, resolved or not.
    pub fn active_kinds(&self) -> Vec<GroupVersionKind> {
        self.set.load().entries.values().map(|e| e.gvk.clone()).collect()
    }

    /// Listable resources for every informable kind. A kind whose resolution
    /// failed makes the whole call fail; pending and unserved kinds are skipped.
    pub fn informable_kinds(&self) -> Result<Vec<ApiResource>, KindError> {
        let snap = self.set.load();
        let mut out = Vec::with_capacity(snap.len());
        for (key, entry) in snap.entries.iter() {
            match &entry.state {
                KindState::Informable(ar) => out.push(ar.clone()),
                KindState::Pending | KindState::Unserved => {}
                KindState::Failed(reason) => {
                    return Err(KindError::Transient { kind: key.clone(), reason: reason.clone() });
                }
            }
        }
        Ok(out)
    }

    /// Like [`informable_kinds`](Self::informable_kinds) but skipping failed kinds.
    pub fn informable_resources(&self) -> Vec<ApiResource> {
        self.set.load().entries.values().filter_map(|e| e.resource().cloned()).collect()
    }

    /// Replace the entry at `key` with whatever `next` returns for the current
    /// one; `None` means no change. Unchanged calls publish nothing.
    fn upsert<F>(&self, key: &str, next: F) -> bool
    where
        F: Fn(Option<&KindEntry>) -> Option<KindEntry>,
    {
        if next(self.set.load().entries.get(key)).is_none() {
            return false;
        }
        let mut changed = false;
        self.set.rcu(|cur| match next(cur.entries.get(key)) {
            Some(entry) => {
                let mut set = KindSet::clone(cur);
                set.entries.insert(key.to_string(), entry);
                set.epoch += 1;
                changed = true;
                Arc::new(set)
            }
            None => {
                changed = false;
                Arc::clone(cur)
            }
        });
        if changed {
            let snap = self.set.load();
            gauge!("opdisco_active_kinds", snap.len() as f64);
            self.epoch_tx.send_replace(snap.epoch);
        }
        changed
    }
}
