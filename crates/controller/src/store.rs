//! The resource store the reconciler reads from and writes to.

use async_trait::async_trait;
use kube::{
    api::{Api, ListParams, PostParams},
    core::{ApiResource, DynamicObject},
    Client, ResourceExt,
};
use opdisco_core::Operator;
use opdisco_decorators::Selector;

use crate::error::StoreError;

const OPERATOR_KIND: &str = "Operator";

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_operator(&self, name: &str) -> Result<Operator, StoreError>;

    /// Fails with `AlreadyExists` if an Operator with that name exists.
    async fn create_operator(&self, operator: &Operator) -> Result<Operator, StoreError>;

    /// Write the status subresource. The resource version of `operator` is
    /// checked, so a stale copy fails with `Conflict`.
    async fn update_operator_status(&self, operator: &Operator) -> Result<Operator, StoreError>;

    /// Objects of one kind, across all namespaces, whose labels match `selector`.
    async fn list(&self, resource: &ApiResource, selector: &Selector) -> Result<Vec<DynamicObject>, StoreError>;
}

/// Store backed by the API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self { Self { client } }

    fn operators(&self) -> Api<Operator> { Api::all(self.client.clone()) }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_operator(&self, name: &str) -> Result<Operator, StoreError> {
        self.operators().get(name).await.map_err(|e| StoreError::from_kube(e, OPERATOR_KIND, name))
    }

    async fn create_operator(&self, operator: &Operator) -> Result<Operator, StoreError> {
        let name = operator.name_any();
        self.operators()
            .create(&PostParams::default(), operator)
            .await
            .map_err(|e| StoreError::from_kube(e, OPERATOR_KIND, &name))
    }

    async fn update_operator_status(&self, operator: &Operator) -> Result<Operator, StoreError> {
        let name = operator.name_any();
        let data = serde_json::to_vec(operator)?;
        self.operators()
            .replace_status(&name, &PostParams::default(), data)
            .await
            .map_err(|e| StoreError::from_kube(e, OPERATOR_KIND, &name))
    }

    async fn list(&self, resource: &ApiResource, selector: &Selector) -> Result<Vec<DynamicObject>, StoreError> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), resource);
        let mut lp = ListParams::default();
        if !selector.is_everything() {
            lp = lp.labels(&selector.to_string());
        }
        let list = api.list(&lp).await.map_err(|e| StoreError::from_kube(e, &resource.kind, "list"))?;
        Ok(list.items)
    }
}
