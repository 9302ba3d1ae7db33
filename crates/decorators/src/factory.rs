use std::sync::Arc;

use opdisco_core::{Operator, OperatorSpec};

use crate::error::{Error, Result};
use crate::operator::OperatorDecorator;
use crate::scheme::Scheme;

/// Value of a namespace argument meaning "all namespaces".
pub const NAMESPACE_ALL: &str = "";

/// Builds Operator decorators that share one scheme.
#[derive(Debug, Clone)]
pub struct OperatorFactory {
    scheme: Arc<Scheme>,
}

impl OperatorFactory {
    pub fn new(scheme: Arc<Scheme>) -> Self { Self { scheme } }

    pub fn scheme(&self) -> &Arc<Scheme> { &self.scheme }

    /// Decorate a copy of `external`; the caller's object is never aliased.
    pub fn new_operator(&self, external: &Operator) -> Result<OperatorDecorator> {
        if let Some(ns) = external.metadata.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            return Err(Error::invalid_argument(format!(
                "Operator {} is cluster-scoped but carries namespace {}",
                external.metadata.name.as_deref().unwrap_or(""),
                ns
            )));
        }
        Ok(OperatorDecorator::new(external.clone(), Arc::clone(&self.scheme)))
    }

    /// Decorator for the Operator of a package installed into `namespace`:
    /// named `<pkg>` for all namespaces, `<pkg>.<namespace>` otherwise.
    pub fn new_package_operator(&self, pkg: &str, namespace: &str) -> Result<OperatorDecorator> {
        if pkg.is_empty() {
            return Err(Error::invalid_argument("empty package name"));
        }
        let name = if namespace == NAMESPACE_ALL { pkg.to_string() } else { format!("{}.{}", pkg, namespace) };
        self.new_operator(&Operator::new(&name, OperatorSpec::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> OperatorFactory { OperatorFactory::new(Arc::new(Scheme::new())) }

    #[test]
    fn package_operator_names() {
        let f = factory();
        assert_eq!(f.new_package_operator("etcd", NAMESPACE_ALL).unwrap().name(), "etcd");
        assert_eq!(f.new_package_operator("etcd", "operators").unwrap().name(), "etcd.operators");
        assert!(matches!(f.new_package_operator("", "ns"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn new_operator_copies_the_external_object() {
        let f = factory();
        let mut external = Operator::new("foo", OperatorSpec::default());
        let mut op = f.new_operator(&external).unwrap();
        op.reset_components().unwrap();
        assert!(external.status.is_none());
        external.metadata.name = Some("bar".into());
        assert_eq!(op.name(), "foo");
    }

    #[test]
    fn namespaced_operators_are_rejected() {
        let mut external = Operator::new("foo", OperatorSpec::default());
        external.metadata.namespace = Some("ns".into());
        assert!(matches!(factory().new_operator(&external), Err(Error::InvalidArgument(_))));
    }
}
