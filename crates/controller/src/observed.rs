use std::sync::{PoisonError, RwLock};

use rustc_hash::FxHashSet;

/// Names of Operators known to exist in the store. Read on every component
/// event, written only when a reconcile finds or misses its Operator.
#[derive(Debug, Default)]
pub struct ObservedSet {
    names: RwLock<FxHashSet<String>>,
}

impl ObservedSet {
    pub fn new() -> Self { Self::default() }

    pub fn observe(&self, name: &str) {
        let mut names = self.names.write().unwrap_or_else(PoisonError::into_inner);
        if !names.contains(name) {
            names.insert(name.to_string());
        }
    }

    pub fn unobserve(&self, name: &str) {
        self.names.write().unwrap_or_else(PoisonError::into_inner).remove(name);
    }

    pub fn observed(&self, name: &str) -> bool {
        self.names.read().unwrap_or_else(PoisonError::into_inner).contains(name)
    }

    pub fn len(&self) -> usize { self.names.read().unwrap_or_else(PoisonError::into_inner).len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn observe_unobserve() {
        let set = ObservedSet::new();
        assert!(!set.observed("foo"));
        set.observe("foo");
        set.observe("foo");
        assert!(set.observed("foo"));
        assert_eq!(set.len(), 1);
        set.unobserve("foo");
        set.unobserve("foo");
        assert!(!set.observed("foo"));
        assert!(set.is_empty());
    }

    #[test]
    fn shared_across_threads() {
        let set = Arc::new(ObservedSet::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let set = Arc::clone(&set);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        let name = format!("op-{}-{}", i, j);
                        set.observe(&name);
                        assert!(set.observed(&name));
                        if j % 2 == 0 {
                            set.unobserve(&name);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(set.len(), 8 * 50);
    }
}
