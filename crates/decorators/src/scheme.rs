//! Type registry shared by all decorators produced by one factory.
//!
//! The scheme knows which typed resources can be turned into dynamic components
//! and fills in type metadata on objects that arrive without it (list items).

use kube::core::{DynamicObject, GroupVersionKind, TypeMeta};
use kube::Resource;
use opdisco_core::{gvk_key, split_api_version, Operator};
use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Scheme {
    kinds: FxHashSet<String>,
}

impl Default for Scheme {
    fn default() -> Self { Self::new() }
}

impl Scheme {
    /// A scheme that already knows the Operator kind.
    pub fn new() -> Self {
        let mut s = Self { kinds: FxHashSet::default() };
        s.register::<Operator>();
        s
    }

    pub fn register<K: Resource<DynamicType = ()>>(&mut self) -> &mut Self {
        let gvk = GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()));
        self.register_gvk(&gvk)
    }

    pub fn register_gvk(&mut self, gvk: &GroupVersionKind) -> &mut Self {
        self.kinds.insert(gvk_key(gvk));
        self
    }

    pub fn recognizes(&self, gvk: &GroupVersionKind) -> bool { self.kinds.contains(&gvk_key(gvk)) }

    pub fn len(&self) -> usize { self.kinds.len() }
    pub fn is_empty(&self) -> bool { self.kinds.is_empty() }

    /// GVK of a dynamic object, read from its type metadata.
    pub fn object_kind(&self, obj: &DynamicObject) -> Result<GroupVersionKind> {
        let types = obj
            .types
            .as_ref()
            .filter(|t| !t.kind.is_empty() && !t.api_version.is_empty())
            .ok_or_else(|| Error::invalid_component(format!("object {} has no type metadata", display_name(obj))))?;
        let (group, version) = split_api_version(&types.api_version);
        Ok(GroupVersionKind::gvk(group, version, &types.kind))
    }

    /// Convert a typed resource into its dynamic form. The type must be registered.
    pub fn to_dynamic<K>(&self, obj: &K) -> Result<DynamicObject>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let gvk = GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()));
        if !self.recognizes(&gvk) {
            return Err(Error::invalid_component(format!("{} is not registered with the scheme", gvk_key(&gvk))));
        }
        let mut out: DynamicObject = serde_json::from_value(serde_json::to_value(obj)?)?;
        self.complete(&mut out, &gvk);
        Ok(out)
    }

    /// Fill in missing type metadata, e.g. on items of a list response.
    pub fn complete(&self, obj: &mut DynamicObject, gvk: &GroupVersionKind) {
        if obj.types.as_ref().map_or(true, |t| t.kind.is_empty()) {
            obj.types = Some(TypeMeta { api_version: opdisco_core::api_version(&gvk.group, &gvk.version), kind: gvk.kind.clone() });
        }
    }
}

pub(crate) fn display_name(obj: &DynamicObject) -> String {
    let name = obj.metadata.name.as_deref().unwrap_or("<unnamed>");
    match obj.metadata.namespace.as_deref() {
        Some(ns) => format!("{}/{}", ns, name),
        None => name.to_string(),
    }
}
