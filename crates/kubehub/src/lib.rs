//! opdisco kubehub: kube integration for the operator controller. Tracks which
//! kinds can hold components, discovers new ones, and wires list+watch streams.

#![forbid(unsafe_code)]

pub mod discovery;
pub mod dynamic;
pub mod watch;

pub use discovery::{apply_discovery, discover, run_discovery, sync_kinds, DiscoveredResource, KindFilter, SyncReport};
pub use dynamic::{DynamicKindSource, KindEntry, KindError, KindSet, KindState};
pub use watch::{watch_components, ComponentEvent};

use anyhow::{Context, Result};

/// Client from the ambient kubeconfig or in-cluster config.
pub async fn get_kube_client() -> Result<kube::Client> {
    kube::Client::try_default().await.context("building kube client")
}
