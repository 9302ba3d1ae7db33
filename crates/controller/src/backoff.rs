//! Per-key retry delays for the controller's error policy.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rustc_hash::FxHashMap;

/// Tracks consecutive failures per key and turns them into exponential delays.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: Mutex<FxHashMap<String, u32>>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self { Self { base, max, failures: Mutex::new(FxHashMap::default()) } }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<String, u32>> { self.failures.lock().unwrap_or_else(PoisonError::into_inner) }

    /// Record a failure for `key` and return `base * 2^(failures-1)`, capped.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut failures = self.lock();
        let n = failures.entry(key.to_string()).or_default();
        *n = n.saturating_add(1);
        let factor = 2u32.saturating_pow(*n - 1);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Clear the failure history of `key`.
    pub fn forget(&self, key: &str) { self.lock().remove(key); }

    pub fn failures(&self, key: &str) -> u32 { self.lock().get(key).copied().unwrap_or(0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_per_key_and_is_capped() {
        let b = Backoff::new(Duration::from_millis(10), Duration::from_millis(50));
        let delays: Vec<_> = (0..5).map(|_| b.next_delay("a").as_millis()).collect();
        assert_eq!(delays, vec![10, 20, 40, 50, 50]);
        assert_eq!(b.failures("a"), 5);
        assert_eq!(b.next_delay("b").as_millis(), 10);
        b.forget("a");
        assert_eq!(b.failures("a"), 0);
        assert_eq!(b.next_delay("a").as_millis(), 10);
    }

    #[test]
    fn huge_failure_counts_saturate() {
        let b = Backoff::new(Duration::from_secs(1), Duration::from_secs(300));
        for _ in 0..100 {
            b.next_delay("a");
        }
        assert_eq!(b.next_delay("a"), Duration::from_secs(300));
    }
}
