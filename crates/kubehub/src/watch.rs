//! List+watch wiring: one watcher per informable kind.

use std::sync::Arc;

use futures::StreamExt;
use kube::{
    api::Api,
    core::{DynamicObject, GroupVersionKind},
    runtime::{
        watcher::{self, Event},
        WatchStreamExt,
    },
    Client,
};
use opdisco_core::gvk_key;
use rustc_hash::FxHashSet;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dynamic::DynamicKindSource;

/// A change to an object of some informable kind.
#[derive(Debug, Clone)]
pub struct ComponentEvent {
    /// GVK key of the watched kind.
    pub kind: String,
    pub object: DynamicObject,
    pub deleted: bool,
}

impl ComponentEvent {
    /// `kind/namespace/name` for logs.
    pub fn describe(&self) -> String {
        format!(
            "{}/{}/{}",
            self.kind,
            self.object.metadata.namespace.as_deref().unwrap_or(""),
            self.object.metadata.name.as_deref().unwrap_or("")
        )
    }
}

/// Start a watcher for every informable kind, and for every kind that becomes
/// informable later. Returns once the kind source is gone or the receiver closed.
pub async fn watch_components(client: Client, kinds: Arc<DynamicKindSource>, tx: mpsc::Sender<ComponentEvent>) {
    let mut epoch_rx = kinds.subscribe();
    let mut started: FxHashSet<String> = FxHashSet::default();
    loop {
        for ar in kinds.informable_resources() {
            let key = gvk_key(&GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind));
            if !started.insert(key.clone()) {
                continue;
            }
            let api: Api<DynamicObject> = Api::all_with(client.clone(), &ar);
            tokio::spawn(pump(api, key, tx.clone()));
        }
        if tx.is_closed() {
            break;
        }
        if epoch_rx.changed().await.is_err() {
            break;
        }
    }
    debug!(watchers = started.len(), "component watch supervisor stopped");
}

/// Forward every event of one kind until `tx` is closed. The watcher recovers
/// from errors on its own, backing off between attempts.
async fn pump(api: Api<DynamicObject>, kind: String, tx: mpsc::Sender<ComponentEvent>) {
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    info!(kind = %kind, "watcher started");
    while let Some(ev) = stream.next().await {
        let batch: Vec<(DynamicObject, bool)> = match ev {
            Ok(Event::Applied(o)) => vec![(o, false)],
            Ok(Event::Deleted(o)) => vec![(o, true)],
            Ok(Event::Restarted(list)) => {
                debug!(kind = %kind, count = list.len(), "watch restart");
                list.into_iter().map(|o| (o, false)).collect()
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "watch failed; retrying");
                continue;
            }
        };
        for (object, deleted) in batch {
            if tx.send(ComponentEvent { kind: kind.clone(), object, deleted }).await.is_err() {
                debug!(kind = %kind, "receiver dropped; watcher exiting");
                return;
            }
        }
    }
    warn!(kind = %kind, "watcher stream ended");
}
