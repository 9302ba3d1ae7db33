use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::DynamicObject;
use kube::Resource;
use once_cell::sync::OnceCell;
use opdisco_core::{Components, Operator, OperatorStatus, RichReference, RuntimeObject, COMPONENT_LABEL_KEY_PREFIX, MAX_LABEL_NAME_LEN};
use serde::Serialize;
use tracing::trace;

use crate::component::Component;
use crate::error::{Error, Result};
use crate::scheme::Scheme;
use crate::selector::{key_selector, Selector, OP_DOES_NOT_EXIST, OP_EXISTS};

/// Candidate Operator names carried by a label set: the suffix of every key with
/// the component label prefix.
pub fn operator_names(labels: &BTreeMap<String, String>) -> Vec<String> {
    labels
        .keys()
        .filter_map(|k| k.strip_prefix(COMPONENT_LABEL_KEY_PREFIX))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Wraps an owned copy of an Operator and manages its component bookkeeping.
#[derive(Debug, Clone)]
pub struct OperatorDecorator {
    operator: Operator,
    scheme: Arc<Scheme>,
    component_label_key: OnceCell<String>,
}

impl OperatorDecorator {
    pub(crate) fn new(operator: Operator, scheme: Arc<Scheme>) -> Self {
        Self { operator, scheme, component_label_key: OnceCell::new() }
    }

    pub fn name(&self) -> &str { self.operator.metadata.name.as_deref().unwrap_or("") }

    pub fn resource(&self) -> &Operator { &self.operator }

    /// Mutable access to the wrapped resource. The label key stays whatever was
    /// computed first, even if the name is changed afterwards.
    pub fn resource_mut(&mut self) -> &mut Operator { &mut self.operator }

    pub fn into_resource(self) -> Operator { self.operator }

    pub fn components(&self) -> Option<&Components> {
        self.operator.status.as_ref().and_then(|s| s.components.as_ref())
    }

    /// `operators.coreos.com/<name truncated to 63 chars>`, computed once.
    pub fn component_label_key(&self) -> Result<&str> {
        self.component_label_key
            .get_or_try_init(|| {
                let name = self.name();
                if name.is_empty() {
                    return Err(Error::invalid_state("empty name field"));
                }
                let truncated = match name.char_indices().nth(MAX_LABEL_NAME_LEN) {
                    Some((idx, _)) => &name[..idx],
                    None => name,
                };
                Ok(format!("{}{}", COMPONENT_LABEL_KEY_PREFIX, truncated))
            })
            .map(String::as_str)
    }

    /// Matches resources carrying this Operator's component label.
    pub fn component_label_selector(&self) -> Result<LabelSelector> {
        Ok(key_selector(self.component_label_key()?, OP_EXISTS))
    }

    /// Matches resources without this Operator's component label.
    pub fn non_component_label_selector(&self) -> Result<LabelSelector> {
        Ok(key_selector(self.component_label_key()?, OP_DOES_NOT_EXIST))
    }

    pub fn component_selector(&self) -> Result<Selector> { Selector::try_from(&self.component_label_selector()?) }

    pub fn non_component_selector(&self) -> Result<Selector> {
        Selector::try_from(&self.non_component_label_selector()?)
    }

    /// Replace the component status with the selector and no references.
    pub fn reset_components(&mut self) -> Result<()> {
        let label_selector = self.component_label_selector()?;
        let status = self.operator.status.get_or_insert_with(OperatorStatus::default);
        status.components = Some(Components { label_selector: Some(label_selector), refs: Vec::new() });
        Ok(())
    }

    /// Add this Operator's component label to `object`. Returns true if the
    /// label was added, false if it was already there.
    pub fn adopt_component(&self, object: &mut DynamicObject) -> Result<bool> {
        let key = self.component_label_key()?;
        let labels = object.metadata.labels.get_or_insert_with(BTreeMap::new);
        if labels.contains_key(key) {
            return Ok(false);
        }
        labels.insert(key.to_string(), String::new());
        Ok(true)
    }

    /// Append references for `components` to the status. Lists are flattened in
    /// order. Every component must carry the component label; on the first one
    /// that doesn't nothing is added and an ownership violation is returned.
    pub fn add_components<I>(&mut self, components: I) -> Result<()>
    where
        I: IntoIterator<Item = RuntimeObject>,
    {
        let selector = self.component_selector()?;
        let mut refs = Vec::new();
        for obj in components {
            self.collect_refs(obj, &selector, &mut refs)?;
        }

        if self.components().is_none() {
            self.reset_components()?;
        }
        if let Some(c) = self.operator.status.as_mut().and_then(|s| s.components.as_mut()) {
            trace!(operator = %self.operator.metadata.name.as_deref().unwrap_or(""), added = refs.len(), "adding component refs");
            c.refs.extend(refs);
        }
        Ok(())
    }

    /// [`add_components`](Self::add_components) for typed resources. The type
    /// must be registered with the scheme.
    pub fn add_typed_components<'a, K, I>(&mut self, components: I) -> Result<()>
    where
        K: Resource<DynamicType = ()> + Serialize + 'a,
        I: IntoIterator<Item = &'a K>,
    {
        let objects = components
            .into_iter()
            .map(|c| self.scheme.to_dynamic(c).map(RuntimeObject::Object))
            .collect::<Result<Vec<_>>>()?;
        self.add_components(objects)
    }

    /// Reset followed by add: membership is recomputed from scratch.
    pub fn set_components<I>(&mut self, components: I) -> Result<()>
    where
        I: IntoIterator<Item = RuntimeObject>,
    {
        self.reset_components()?;
        self.add_components(components)
    }

    fn collect_refs(&self, obj: RuntimeObject, selector: &Selector, out: &mut Vec<RichReference>) -> Result<()> {
        match obj {
            RuntimeObject::List(list) => {
                for item in list.items {
                    self.collect_refs(item, selector, out)?;
                }
                Ok(())
            }
            RuntimeObject::Object(object) => {
                let component = Component::new(object, Arc::clone(&self.scheme))?;
                if !component.matches(selector) {
                    return Err(Error::OwnershipViolation {
                        component: component.describe(),
                        operator: self.name().to_string(),
                        selector: selector.to_string(),
                    });
                }
                out.push(component.reference()?);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::OperatorFactory;
    use opdisco_core::DynamicList;

    const SEVENTY: &str = "abcdefghijklmnopqrstuvwxyzabcdefghijklmnopqrstuvwxyzabcdexyz0123456789";

    fn factory() -> OperatorFactory { OperatorFactory::new(Arc::new(Scheme::new())) }

    fn decorator(name: &str) -> OperatorDecorator { factory().new_operator(&Operator::new(name, Default::default())).unwrap() }

    fn cm(name: &str, labels: &[&str]) -> RuntimeObject {
        let labels: serde_json::Map<String, serde_json::Value> =
            labels.iter().map(|k| (k.to_string(), serde_json::Value::String(String::new()))).collect();
        RuntimeObject::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": "ns", "labels": labels }
        }))
        .unwrap()
    }

    fn ref_names(op: &OperatorDecorator) -> Vec<String> {
        op.components().unwrap().refs.iter().filter_map(|r| r.name.clone()).collect()
    }

    #[test]
    fn label_key_for_short_name() {
        let op = decorator("foo");
        assert_eq!(op.component_label_key().unwrap(), "operators.coreos.com/foo");
    }

    #[test]
    fn label_key_truncates_long_names() {
        assert_eq!(SEVENTY.len(), 70);
        let op = decorator(SEVENTY);
        let key = op.component_label_key().unwrap();
        assert_eq!(key, format!("operators.coreos.com/{}", &SEVENTY[..63]));
        assert_eq!(key.len(), "operators.coreos.com/".len() + 63);
    }

    #[test]
    fn label_key_is_memoized() {
        let mut op = decorator("foo");
        let first = op.component_label_key().unwrap().to_string();
        op.resource_mut().metadata.name = Some("bar".into());
        assert_eq!(op.component_label_key().unwrap(), first);
    }

    #[test]
    fn empty_name_is_invalid_state() {
        let op = decorator("");
        assert!(matches!(op.component_label_key(), Err(Error::InvalidState(_))));
        assert!(op.component_selector().is_err());
    }

    #[test]
    fn component_selectors_partition_label_sets() {
        let op = decorator("foo");
        let key = op.component_label_key().unwrap().to_string();
        let present = op.component_selector().unwrap();
        let absent = op.non_component_selector().unwrap();

        let universe: Vec<BTreeMap<String, String>> = vec![
            BTreeMap::new(),
            [(key.clone(), String::new())].into_iter().collect(),
            [(key.clone(), "x".to_string()), ("other".to_string(), "y".to_string())].into_iter().collect(),
            [("operators.coreos.com/bar".to_string(), String::new())].into_iter().collect(),
        ];
        for labels in &universe {
            assert_ne!(present.matches(labels), absent.matches(labels), "labels {:?}", labels);
            assert_eq!(present.matches(labels), labels.contains_key(&key));
        }
    }

    #[test]
    fn reset_records_selector_and_clears_refs() {
        let mut op = decorator("foo");
        op.add_components(vec![cm("a", &["operators.coreos.com/foo"])]).unwrap();
        op.reset_components().unwrap();
        let c = op.components().unwrap();
        assert!(c.refs.is_empty());
        assert_eq!(c.label_selector, Some(op.component_label_selector().unwrap()));
    }

    #[test]
    fn set_components_overwrites_previous_membership() {
        let mut op = decorator("foo");
        op.set_components(vec![cm("a", &["operators.coreos.com/foo"]), cm("b", &["operators.coreos.com/foo"])]).unwrap();
        op.set_components(vec![cm("c", &["operators.coreos.com/foo"])]).unwrap();
        assert_eq!(ref_names(&op), vec!["c"]);
    }

    #[test]
    fn add_components_accumulates() {
        let mut op = decorator("foo");
        op.add_components(vec![cm("a", &["operators.coreos.com/foo"])]).unwrap();
        op.add_components(vec![cm("b", &["operators.coreos.com/foo"])]).unwrap();
        assert_eq!(ref_names(&op), vec!["a", "b"]);
    }

    #[test]
    fn list_arguments_are_flattened_in_order() {
        let items = ["a", "b", "c"].map(|n| cm(n, &["operators.coreos.com/foo"]));

        let mut individually = decorator("foo");
        individually.add_components(items.clone()).unwrap();

        let mut list = DynamicList::default();
        for item in items {
            list.push(item);
        }
        let mut as_list = decorator("foo");
        as_list.add_components(vec![RuntimeObject::List(list)]).unwrap();

        assert_eq!(individually.components().unwrap().refs, as_list.components().unwrap().refs);
        assert_eq!(ref_names(&as_list), vec!["a", "b", "c"]);
    }

    #[test]
    fn unlabeled_component_is_an_ownership_violation() {
        let mut op = decorator("foo");
        op.add_components(vec![cm("a", &["operators.coreos.com/foo"])]).unwrap();
        let before = op.components().cloned();

        let err = op
            .add_components(vec![cm("b", &["operators.coreos.com/foo"]), cm("stray", &["operators.coreos.com/bar"])])
            .unwrap_err();
        assert!(err.is_ownership_violation());
        let msg = err.to_string();
        assert!(msg.contains("ConfigMap/ns/stray"), "{}", msg);
        assert!(msg.contains("operators.coreos.com/foo"), "{}", msg);
        assert_eq!(op.components().cloned(), before);
    }

    #[test]
    fn typed_components_go_through_the_scheme() {
        use k8s_openapi::api::core::v1::ConfigMap;
        use kube::api::ObjectMeta;

        let typed = |name: &str, label: &str| ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("ns".into()),
                labels: Some([(label.to_string(), String::new())].into_iter().collect()),
                ..Default::default()
            },
            ..Default::default()
        };

        // Unregistered type: nothing is added.
        let mut op = decorator("foo");
        let err = op.add_typed_components([&typed("a", "operators.coreos.com/foo")]).unwrap_err();
        assert!(matches!(err, Error::InvalidComponent(_)));
        assert!(op.components().is_none());

        let mut scheme = Scheme::new();
        scheme.register::<ConfigMap>();
        let factory = OperatorFactory::new(Arc::new(scheme));
        let mut op = factory.new_operator(&Operator::new("foo", Default::default())).unwrap();
        op.add_typed_components([&typed("a", "operators.coreos.com/foo"), &typed("b", "operators.coreos.com/foo")]).unwrap();
        assert_eq!(ref_names(&op), vec!["a", "b"]);
        assert_eq!(op.components().unwrap().refs[0].kind.as_deref(), Some("ConfigMap"));
        assert_eq!(op.components().unwrap().refs[0].api_version.as_deref(), Some("v1"));

        let err = op.add_typed_components([&typed("c", "operators.coreos.com/bar")]).unwrap_err();
        assert!(err.is_ownership_violation());
        assert_eq!(ref_names(&op), vec!["a", "b"]);
    }

    #[test]
    fn adopt_component_labels_once() {
        let op = decorator("foo");
        let RuntimeObject::Object(mut obj) = cm("a", &[]) else { unreachable!() };
        assert!(op.adopt_component(&mut obj).unwrap());
        assert!(!op.adopt_component(&mut obj).unwrap());
        assert_eq!(obj.metadata.labels.unwrap().get("operators.coreos.com/foo").map(String::as_str), Some(""));
    }

    #[test]
    fn operator_names_extracts_prefixed_keys() {
        let labels: BTreeMap<String, String> = [
            ("operators.coreos.com/foo", ""),
            ("operators.coreos.com/bar.ns", "x"),
            ("app", "web"),
            ("operators.coreos.com/", ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(operator_names(&labels), vec!["bar.ns", "foo"]);
        assert!(operator_names(&BTreeMap::new()).is_empty());
    }
}
