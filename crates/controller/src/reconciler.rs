//! One reconcile pass per Operator key, plus the mapping from component
//! events to Operator keys.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::core::GroupVersionKind;
use metrics::counter;
use opdisco_core::{DynamicList, Operator, OperatorSpec, RuntimeObject};
use opdisco_decorators::{operator_names, OperatorFactory, Selector};
use opdisco_kubehub::{ComponentEvent, DynamicKindSource};
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::observed::ObservedSet;
use crate::store::ResourceStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Status was written with this many component references.
    Updated { components: usize },
    /// The Operator no longer exists.
    Gone,
}

pub struct Reconciler<S: ResourceStore + ?Sized> {
    store: Arc<S>,
    factory: OperatorFactory,
    kinds: Arc<DynamicKindSource>,
    observed: ObservedSet,
}

impl<S: ResourceStore + ?Sized> std::fmt::Debug for Reconciler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").field("kinds", &self.kinds).field("observed", &self.observed.len()).finish()
    }
}

impl<S: ResourceStore + ?Sized> Reconciler<S> {
    pub fn new(store: Arc<S>, factory: OperatorFactory, kinds: Arc<DynamicKindSource>) -> Self {
        Self { store, factory, kinds, observed: ObservedSet::new() }
    }

    pub fn store(&self) -> &Arc<S> { &self.store }

    pub fn kinds(&self) -> &Arc<DynamicKindSource> { &self.kinds }

    pub fn observed(&self) -> &ObservedSet { &self.observed }

    /// Fetch the Operator `name`, recompute its components from every
    /// informable kind and write the status back.
    pub async fn reconcile(&self, name: &str) -> Result<ReconcileOutcome, ReconcileError> {
        let fetched = match self.store.get_operator(name).await {
            Ok(op) => op,
            Err(e) if e.is_not_found() => {
                self.observed.unobserve(name);
                info!(operator = %name, "operator gone; dropped from observed set");
                return Ok(ReconcileOutcome::Gone);
            }
            Err(source) => return Err(ReconcileError::Fetch { name: name.to_string(), source }),
        };
        self.observed.observe(name);

        let mut operator = self.factory.new_operator(&fetched)?;
        let selector = operator.component_selector()?;
        let lists = self.list_components(&selector).await?;
        operator.set_components(lists)?;

        let count = operator.components().map_or(0, |c| c.refs.len());
        debug!(operator = %name, components = count, selector = %selector, "components refreshed");
        self.store
            .update_operator_status(operator.resource())
            .await
            .map_err(|source| ReconcileError::Write { name: name.to_string(), source })?;
        Ok(ReconcileOutcome::Updated { components: count })
    }

    /// One list per informable kind, each holding the objects matched by `selector`.
    async fn list_components(&self, selector: &Selector) -> Result<Vec<RuntimeObject>, ReconcileError> {
        let resources = self.kinds.informable_kinds()?;
        let mut lists = Vec::with_capacity(resources.len());
        for resource in resources {
            let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
            let mut list = DynamicList::for_kind(&gvk);
            let objects = self
                .store
                .list(&resource, selector)
                .await
                .map_err(|source| ReconcileError::List { kind: resource.kind.clone(), source })?;
            for mut obj in objects {
                self.factory.scheme().complete(&mut obj, &gvk);
                list.push(obj);
            }
            lists.push(RuntimeObject::List(list));
        }
        Ok(lists)
    }

    /// Operator keys to enqueue for a component carrying `labels`. Operators
    /// not yet observed are created instead; their own watch event enqueues
    /// them. Never fails.
    pub async fn map_component_requests(&self, labels: &BTreeMap<String, String>, origin: &str) -> Vec<String> {
        self.map_labels(labels, origin, true).await
    }

    /// Like [`map_component_requests`](Self::map_component_requests) for a
    /// watch event. A deleted component only refreshes observed Operators;
    /// it never causes one to be created.
    pub async fn map_component_event(&self, event: &ComponentEvent) -> Vec<String> {
        let Some(labels) = event.object.metadata.labels.as_ref() else { return Vec::new() };
        self.map_labels(labels, &event.describe(), !event.deleted).await
    }

    async fn map_labels(&self, labels: &BTreeMap<String, String>, origin: &str, create_missing: bool) -> Vec<String> {
        let mut requests = Vec::new();
        for name in operator_names(labels) {
            if self.observed.observed(&name) {
                requests.push(name);
            } else if create_missing {
                self.ensure_operator(&name, origin).await;
            }
        }
        requests
    }

    async fn ensure_operator(&self, name: &str, origin: &str) {
        let operator = Operator::new(name, OperatorSpec::default());
        match self.store.create_operator(&operator).await {
            Ok(_) => {
                counter!("opdisco_operator_create_total", 1u64, "result" => "created");
                info!(operator = %name, component = %origin, "created operator for labeled component");
            }
            Err(e) if e.is_already_exists() => {
                counter!("opdisco_operator_create_total", 1u64, "result" => "exists");
                debug!(operator = %name, "operator already exists");
            }
            Err(e) => {
                counter!("opdisco_operator_create_total", 1u64, "result" => "error");
                warn!(operator = %name, component = %origin, error = %e, "failed to create operator");
            }
        }
    }
}
