use std::collections::BTreeMap;
use std::sync::Arc;

use kube::core::DynamicObject;
use opdisco_core::{api_version, Condition, RichReference};

use crate::error::{Error, Result};
use crate::scheme::{display_name, Scheme};
use crate::selector::Selector;

/// A cluster object of any kind, considered as a candidate Operator component.
#[derive(Debug, Clone)]
pub struct Component {
    object: DynamicObject,
    scheme: Arc<Scheme>,
}

impl Component {
    /// Wrap `object`. Fails when its kind cannot be determined.
    pub fn new(object: DynamicObject, scheme: Arc<Scheme>) -> Result<Self> {
        scheme.object_kind(&object)?;
        Ok(Self { object, scheme })
    }

    pub fn object(&self) -> &DynamicObject { &self.object }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        static EMPTY: BTreeMap<String, String> = BTreeMap::new();
        self.object.metadata.labels.as_ref().unwrap_or(&EMPTY)
    }

    pub fn matches(&self, selector: &Selector) -> bool { selector.matches(self.labels()) }

    /// `kind/namespace/name` for messages.
    pub fn describe(&self) -> String {
        let kind = self.object.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("<unknown>");
        format!("{}/{}", kind, display_name(&self.object))
    }

    /// Truncated reference plus the conditions found under `status.conditions`.
    /// Missing conditions are not an error; malformed ones are.
    pub fn reference(&self) -> Result<RichReference> {
        let gvk = self.scheme.object_kind(&self.object)?;
        let mut reference = RichReference {
            kind: Some(gvk.kind.clone()),
            api_version: Some(api_version(&gvk.group, &gvk.version)),
            namespace: self.object.metadata.namespace.clone(),
            name: self.object.metadata.name.clone(),
            conditions: Vec::new(),
        };
        if let Some(raw) = self.object.data.get("status").and_then(|s| s.get("conditions")) {
            if !raw.is_null() {
                reference.conditions = serde_json::from_value::<Vec<Condition>>(raw.clone()).map_err(Error::Decode)?;
            }
        }
        Ok(reference)
    }
}
