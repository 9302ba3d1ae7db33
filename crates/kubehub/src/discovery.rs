//! API discovery feeding the dynamic kind set.

use std::time::Duration;

use anyhow::{Context, Result};
use kube::{
    core::{ApiResource, GroupVersionKind},
    discovery::{verbs, Discovery, Scope},
    Client,
};
use opdisco_core::gvk_key;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dynamic::DynamicKindSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
    /// Supports both list and watch.
    pub informable: bool,
    /// The version discovery recommends for this kind.
    pub preferred: bool,
}

impl DiscoveredResource {
    pub fn gvk(&self) -> GroupVersionKind { GroupVersionKind::gvk(&self.group, &self.version, &self.kind) }

    pub fn gvk_key(&self) -> String { gvk_key(&self.gvk()) }

    pub fn api_resource(&self) -> ApiResource { ApiResource::from_gvk_with_plural(&self.gvk(), &self.plural) }
}

/// Restricts which discovered kinds may become informable.
#[derive(Debug, Clone, Default)]
pub enum KindFilter {
    #[default]
    All,
    Only(FxHashSet<String>),
}

impl KindFilter {
    pub fn only<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(keys.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, key: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(keys) => keys.contains(key),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub activated: usize,
    pub unserved: usize,
}

/// Discover every served version of every resource (incl. CRDs).
pub async fn discover(client: Client) -> Result<Vec<DiscoveredResource>> {
    let discovery = Discovery::new(client).run().await.context("running API discovery")?;
    let mut out = Vec::new();
    for group in discovery.groups() {
        let preferred: FxHashSet<String> = group
            .recommended_resources()
            .iter()
            .map(|(ar, _)| gvk_key(&GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind)))
            .collect();
        for version in group.versions() {
            for (ar, caps) in group.versioned_resources(version) {
                let key = gvk_key(&GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind));
                out.push(DiscoveredResource {
                    group: ar.group.clone(),
                    version: ar.version.clone(),
                    kind: ar.kind.clone(),
                    plural: ar.plural.clone(),
                    namespaced: matches!(caps.scope, Scope::Namespaced),
                    informable: caps.supports_operation(verbs::LIST) && caps.supports_operation(verbs::WATCH),
                    preferred: preferred.contains(&key),
                });
            }
        }
    }
    // Stable-ish order
    out.sort_by(|a, b| a.group.cmp(&b.group).then(a.version.cmp(&b.version)).then(a.kind.cmp(&b.kind)));
    Ok(out)
}

/// Fold one discovery result into the kind set. Under [`KindFilter::All`] the
/// preferred version of every informable kind is listed; seeded kinds are
/// listed in whatever served version they name. Registered kinds outside that
/// set (gone, or superseded by a newer preferred version) are marked unserved.
/// Nothing is ever removed.
pub fn apply_discovery(kinds: &DynamicKindSource, discovered: &[DiscoveredResource], filter: &KindFilter) -> SyncReport {
    let mut report = SyncReport::default();
    let mut listed = FxHashSet::default();
    for r in discovered.iter().filter(|r| r.informable) {
        let key = r.gvk_key();
        let wanted = match filter {
            KindFilter::All => r.preferred,
            KindFilter::Only(_) => filter.allows(&key),
        };
        if !wanted {
            continue;
        }
        if kinds.activate(r.api_resource()) {
            report.activated += 1;
        }
        listed.insert(key);
    }
    let snap = kinds.snapshot();
    for (key, entry) in snap.entries() {
        if !listed.contains(key) && kinds.mark_unserved(&entry.gvk) {
            report.unserved += 1;
        }
    }
    report
}

/// Run discovery once. If discovery itself fails, kinds still waiting for
/// resolution are marked failed until a later pass succeeds.
pub async fn sync_kinds(client: Client, kinds: &DynamicKindSource, filter: &KindFilter) -> Result<SyncReport> {
    let discovered = match discover(client).await {
        Ok(d) => d,
        Err(e) => {
            let failed = kinds.fail_pending(&format!("{:#}", e));
            if failed > 0 {
                warn!(failed, "pending kinds left unresolved");
            }
            return Err(e);
        }
    };
    let report = apply_discovery(kinds, &discovered, filter);
    debug!(served = discovered.len(), activated = report.activated, unserved = report.unserved, "kind sync");
    Ok(report)
}

/// Re-run discovery every `interval` so new CRDs become informable without a restart.
pub async fn run_discovery(client: Client, kinds: std::sync::Arc<DynamicKindSource>, filter: KindFilter, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match sync_kinds(client.clone(), &kinds, &filter).await {
            Ok(report) if report.activated > 0 => info!(activated = report.activated, total = kinds.snapshot().len(), "kinds discovered"),
            Ok(_) => {}
            Err(e) => warn!(error = ?e, "discovery failed; keeping current kinds"),
        }
    }
}
