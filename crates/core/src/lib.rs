//! opdisco core types: the Operator resource, the component status it carries,
//! and the GVK/list helpers shared by every other crate.

#![forbid(unsafe_code)]

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, Time};
use kube::core::{DynamicObject, GroupVersionKind, TypeMeta};
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Key prefix of labels marking Operator component resources.
pub const COMPONENT_LABEL_KEY_PREFIX: &str = "operators.coreos.com/";

/// Upper bound on the name segment of a label key.
pub const MAX_LABEL_NAME_LEN: usize = 63;

/// Spec of the aggregate Operator resource. Operators carry no desired state;
/// everything of interest lives in the status.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize)]
#[kube(
    group = "operators.coreos.com",
    version = "v2alpha1",
    kind = "Operator",
    status = "OperatorStatus",
    schema = "disabled"
)]
pub struct OperatorSpec {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Components>,
}

/// Components selected into an Operator, plus the selector that found them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Components {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
    #[serde(default)]
    pub refs: Vec<RichReference>,
}

/// Truncated object reference (no resourceVersion/uid) plus the conditions the
/// referenced object reports about itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RichReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// A condition as reported under `status.conditions` of an arbitrary component.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<Time>,
}

/// A single object or a collection of objects, as handed to the component
/// bookkeeping of an Operator. Lists may nest.
#[derive(Debug, Clone)]
pub enum RuntimeObject {
    Object(DynamicObject),
    List(DynamicList),
}

/// Collection of objects of one kind, e.g. the result of a label-filtered list.
#[derive(Debug, Clone, Default)]
pub struct DynamicList {
    pub types: Option<TypeMeta>,
    pub items: Vec<RuntimeObject>,
}

impl DynamicList {
    /// Empty list request object for `gvk` (kind is suffixed with `List`).
    pub fn for_kind(gvk: &GroupVersionKind) -> Self {
        Self {
            types: Some(TypeMeta {
                api_version: api_version(&gvk.group, &gvk.version),
                kind: format!("{}List", gvk.kind),
            }),
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn push(&mut self, obj: impl Into<RuntimeObject>) {
        self.items.push(obj.into());
    }
}

impl From<DynamicObject> for RuntimeObject {
    fn from(v: DynamicObject) -> Self { Self::Object(v) }
}

impl From<DynamicList> for RuntimeObject {
    fn from(v: DynamicList) -> Self { Self::List(v) }
}

impl RuntimeObject {
    /// Decode raw JSON. Anything carrying an `items` array is a list and its
    /// elements are decoded recursively.
    pub fn from_value(v: Json) -> Result<Self, serde_json::Error> {
        match v {
            Json::Object(mut map) if map.get("items").map_or(false, Json::is_array) => {
                let types = match (map.get("apiVersion"), map.get("kind")) {
                    (Some(Json::String(av)), Some(Json::String(k))) => Some(TypeMeta { api_version: av.clone(), kind: k.clone() }),
                    _ => None,
                };
                let raw_items = match map.remove("items") {
                    Some(Json::Array(items)) => items,
                    _ => Vec::new(),
                };
                let items = raw_items.into_iter().map(Self::from_value).collect::<Result<Vec<_>, _>>()?;
                Ok(Self::List(DynamicList { types, items }))
            }
            other => serde_json::from_value::<DynamicObject>(other).map(Self::Object),
        }
    }
}

/// Render `group/version`, or just `version` for the core group.
pub fn api_version(group: &str, version: &str) -> String {
    if group.is_empty() { version.to_string() } else { format!("{}/{}", group, version) }
}

/// Split an apiVersion into `(group, version)`.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.rsplit_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Stable string key for a GVK: `v1/Kind` or `group/v1/Kind`.
pub fn gvk_key(gvk: &GroupVersionKind) -> String {
    format!("{}/{}", api_version(&gvk.group, &gvk.version), gvk.kind)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid gvk key: {0} (expect v1/Kind or group/v1/Kind)")]
pub struct ParseKindError(pub String);

pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind, ParseKindError> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind::gvk("", version, kind)),
        [group, version, kind] if !group.is_empty() && !version.is_empty() && !kind.is_empty() => {
            Ok(GroupVersionKind::gvk(group, version, kind))
        }
        _ => Err(ParseKindError(key.to_string())),
    }
}

pub mod prelude {
    pub use super::{
        Components, Condition, DynamicList, Operator, OperatorSpec, OperatorStatus, RichReference, RuntimeObject,
        COMPONENT_LABEL_KEY_PREFIX,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gvk_keys_parse_and_render() {
        let core = parse_gvk_key("v1/ConfigMap").unwrap();
        assert_eq!(core.group, "");
        assert_eq!(gvk_key(&core), "v1/ConfigMap");

        let apps = parse_gvk_key("apps/v1/Deployment").unwrap();
        assert_eq!(apps.group, "apps");
        assert_eq!(gvk_key(&apps), "apps/v1/Deployment");

        assert!(parse_gvk_key("Deployment").is_err());
        assert!(parse_gvk_key("a/b/c/d").is_err());
        assert!(parse_gvk_key("/v1/Kind").is_err());
    }

    #[test]
    fn split_api_version_handles_core_group() {
        assert_eq!(split_api_version("v1"), ("", "v1"));
        assert_eq!(split_api_version("apps/v1"), ("apps", "v1"));
    }

    #[test]
    fn list_request_is_suffixed() {
        let l = DynamicList::for_kind(&GroupVersionKind::gvk("apps", "v1", "Deployment"));
        let t = l.types.unwrap();
        assert_eq!(t.api_version, "apps/v1");
        assert_eq!(t.kind, "DeploymentList");
    }

    #[test]
    fn from_value_unpacks_nested_lists() {
        let v = serde_json::json!({
            "apiVersion": "v1",
            "kind": "List",
            "items": [
                { "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "a", "namespace": "ns" } },
                { "kind": "ConfigMapList", "apiVersion": "v1", "items": [
                    { "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "b", "namespace": "ns" } }
                ]}
            ]
        });
        let RuntimeObject::List(list) = RuntimeObject::from_value(v).unwrap() else { panic!("expected list") };
        assert_eq!(list.len(), 2);
        assert!(matches!(&list.items[0], RuntimeObject::Object(o) if o.metadata.name.as_deref() == Some("a")));
        assert!(matches!(&list.items[1], RuntimeObject::List(l) if l.len() == 1));
    }

    #[test]
    fn status_serializes_in_wire_shape() {
        let status = OperatorStatus {
            components: Some(Components {
                label_selector: None,
                refs: vec![RichReference {
                    kind: Some("ConfigMap".into()),
                    api_version: Some("v1".into()),
                    namespace: Some("ns".into()),
                    name: Some("cm".into()),
                    conditions: vec![],
                }],
            }),
        };
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["components"]["refs"][0]["apiVersion"], "v1");
        assert!(v["components"]["refs"][0].get("conditions").is_none());
    }
}
