//! In-memory resource store for tests and local experiments.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use opdisco_core::{gvk_key, Operator};
use opdisco_decorators::Selector;
use rustc_hash::FxHashMap;

use crate::error::StoreError;
use crate::store::ResourceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Create,
    UpdateStatus,
    List,
}

#[derive(Debug, Default)]
struct State {
    operators: BTreeMap<String, Operator>,
    /// Objects keyed by GVK key.
    objects: BTreeMap<String, Vec<DynamicObject>>,
    revision: u64,
    faults: FxHashMap<StoreOp, String>,
    calls: FxHashMap<StoreOp, usize>,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn enter(&mut self, op: StoreOp) -> Result<(), StoreError> {
        *self.calls.entry(op).or_default() += 1;
        match self.faults.get(&op) {
            Some(msg) => Err(StoreError::Other(msg.clone())),
            None => Ok(()),
        }
    }
}

/// Keeps Operators and arbitrary objects in memory. Writes are checked against
/// resource versions like the API server does; failures can be injected per
/// operation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, State> { self.state.lock().unwrap_or_else(PoisonError::into_inner) }

    /// Insert or replace an Operator, assigning a fresh resource version.
    pub fn insert_operator(&self, mut operator: Operator) -> Operator {
        let mut st = self.lock();
        operator.metadata.resource_version = Some(st.next_revision());
        let name = operator.metadata.name.clone().unwrap_or_default();
        st.operators.insert(name, operator.clone());
        operator
    }

    pub fn operator(&self, name: &str) -> Option<Operator> { self.lock().operators.get(name).cloned() }

    pub fn operator_names(&self) -> Vec<String> { self.lock().operators.keys().cloned().collect() }

    pub fn delete_operator(&self, name: &str) -> Option<Operator> { self.lock().operators.remove(name) }

    /// Insert or replace (by namespace/name) an object of kind `gvk`.
    pub fn insert_object(&self, gvk: &GroupVersionKind, mut object: DynamicObject) {
        let mut st = self.lock();
        object.metadata.resource_version = Some(st.next_revision());
        let bucket = st.objects.entry(gvk_key(gvk)).or_default();
        bucket.retain(|o| !same_object(o, &object));
        bucket.push(object);
    }

    pub fn remove_object(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> bool {
        let mut st = self.lock();
        let Some(bucket) = st.objects.get_mut(&gvk_key(gvk)) else { return false };
        let before = bucket.len();
        bucket.retain(|o| !(o.metadata.namespace.as_deref() == namespace && o.metadata.name.as_deref() == Some(name)));
        bucket.len() != before
    }

    /// Make every subsequent `op` fail with `message` until healed.
    pub fn fail(&self, op: StoreOp, message: &str) { self.lock().faults.insert(op, message.to_string()); }

    pub fn heal(&self, op: StoreOp) { self.lock().faults.remove(&op); }

    /// Number of times `op` was attempted.
    pub fn calls(&self, op: StoreOp) -> usize { self.lock().calls.get(&op).copied().unwrap_or(0) }
}

fn same_object(a: &DynamicObject, b: &DynamicObject) -> bool {
    a.metadata.namespace == b.metadata.namespace && a.metadata.name == b.metadata.name
}

fn not_found(name: &str) -> StoreError { StoreError::NotFound { kind: "Operator".into(), name: name.into() } }

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_operator(&self, name: &str) -> Result<Operator, StoreError> {
        let mut st = self.lock();
        st.enter(StoreOp::Get)?;
        st.operators.get(name).cloned().ok_or_else(|| not_found(name))
    }

    async fn create_operator(&self, operator: &Operator) -> Result<Operator, StoreError> {
        let mut st = self.lock();
        st.enter(StoreOp::Create)?;
        let name = operator.metadata.name.clone().unwrap_or_default();
        if name.is_empty() {
            return Err(StoreError::Other("name is required".into()));
        }
        if st.operators.contains_key(&name) {
            return Err(StoreError::AlreadyExists { kind: "Operator".into(), name });
        }
        let mut created = operator.clone();
        created.metadata.resource_version = Some(st.next_revision());
        st.operators.insert(name, created.clone());
        Ok(created)
    }

    async fn update_operator_status(&self, operator: &Operator) -> Result<Operator, StoreError> {
        let mut st = self.lock();
        st.enter(StoreOp::UpdateStatus)?;
        let name = operator.metadata.name.clone().unwrap_or_default();
        let stored_rv = match st.operators.get(&name) {
            Some(stored) => stored.metadata.resource_version.clone(),
            None => return Err(not_found(&name)),
        };
        if operator.metadata.resource_version != stored_rv {
            return Err(StoreError::Conflict {
                kind: "Operator".into(),
                name,
                message: "the object has been modified; please apply your changes to the latest version".into(),
            });
        }
        let rv = st.next_revision();
        let stored = st.operators.get_mut(&name).ok_or_else(|| not_found(&name))?;
        // Status subresource: only the status is taken from the caller.
        stored.status = operator.status.clone();
        stored.metadata.resource_version = Some(rv);
        Ok(stored.clone())
    }

    async fn list(&self, resource: &ApiResource, selector: &Selector) -> Result<Vec<DynamicObject>, StoreError> {
        let mut st = self.lock();
        st.enter(StoreOp::List)?;
        let key = gvk_key(&GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind));
        let empty = BTreeMap::new();
        Ok(st
            .objects
            .get(&key)
            .map(|objs| {
                objs.iter()
                    .filter(|o| selector.matches(o.metadata.labels.as_ref().unwrap_or(&empty)))
                    .cloned()
                    .map(|mut o| {
                        // List items come back without type metadata.
                        o.types = None;
                        o
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opdisco_core::OperatorSpec;

    #[tokio::test]
    async fn stale_status_writes_conflict() {
        let store = MemoryStore::new();
        let stored = store.insert_operator(Operator::new("foo", OperatorSpec::default()));
        let updated = store.update_operator_status(&stored).await.unwrap();
        assert_ne!(updated.metadata.resource_version, stored.metadata.resource_version);
        let err = store.update_operator_status(&stored).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn duplicate_creates_already_exist() {
        let store = MemoryStore::new();
        let op = Operator::new("foo", OperatorSpec::default());
        store.create_operator(&op).await.unwrap();
        assert!(store.create_operator(&op).await.unwrap_err().is_already_exists());
        assert_eq!(store.calls(StoreOp::Create), 2);
    }

    #[tokio::test]
    async fn injected_faults_until_healed() {
        let store = MemoryStore::new();
        store.insert_operator(Operator::new("foo", OperatorSpec::default()));
        store.fail(StoreOp::Get, "etcd unavailable");
        assert!(matches!(store.get_operator("foo").await, Err(StoreError::Other(_))));
        store.heal(StoreOp::Get);
        assert!(store.get_operator("foo").await.is_ok());
        assert!(store.get_operator("bar").await.unwrap_err().is_not_found());
    }
}
