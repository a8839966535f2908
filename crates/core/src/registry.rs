//! Governor registry: a name-keyed map of [`Governor`] instances, so a host
//! with several protected services can look one up by name instead of
//! threading `Arc<Governor>` handles through its own plumbing.
//!
//! The registry is explicit and first-class — [`GovernorRegistry::new`] is
//! the primary API. [`global`] is a convenience process-wide instance built
//! on top of it, offered as sugar, not as the only way to use this crate.

use crate::governor::Governor;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A name-keyed collection of [`Governor`] instances.
///
/// One registry typically lives for the lifetime of a host process, shared
/// across request-handling threads. Lookups and inserts are independent of
/// any single Governor's own evaluation lock.
#[derive(Default)]
pub struct GovernorRegistry {
    governors: RwLock<HashMap<String, Arc<Governor>>>,
}

impl GovernorRegistry {
    pub fn new() -> Self {
        Self {
            governors: RwLock::new(HashMap::new()),
        }
    }

    /// Register a Governor under `name`, replacing any prior entry with the
    /// same name. Returns the replaced Governor, if any.
    pub fn register(&self, name: impl Into<String>, governor: Governor) -> Option<Arc<Governor>> {
        self.governors
            .write()
            .insert(name.into(), Arc::new(governor))
    }

    /// Fetch the Governor registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<Arc<Governor>> {
        self.governors.read().get(name).cloned()
    }

    /// Fetch the Governor registered under `name`, creating one with
    /// `initial_r` on first access.
    pub fn get_or_create(&self, name: &str, initial_r: f64) -> Arc<Governor> {
        if let Some(existing) = self.get(name) {
            return existing;
        }
        let mut governors = self.governors.write();
        governors
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Governor::new(initial_r)))
            .clone()
    }

    /// Remove and return the Governor registered under `name`, if any.
    pub fn remove(&self, name: &str) -> Option<Arc<Governor>> {
        self.governors.write().remove(name)
    }

    /// Names of every registered Governor, in arbitrary order.
    pub fn names(&self) -> Vec<String> {
        self.governors.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.governors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static GLOBAL_REGISTRY: Lazy<GovernorRegistry> = Lazy::new(GovernorRegistry::new);

/// The process-wide convenience registry. Syntactic sugar over an explicitly
/// constructed [`GovernorRegistry`] — hosts that want isolated registries
/// (e.g. in tests) should construct their own instead.
pub fn global() -> &'static GovernorRegistry {
    &GLOBAL_REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_get_round_trips() {
        let registry = GovernorRegistry::new();
        registry.register("checkout", Governor::new(1.5));
        let handle = registry.get("checkout").expect("registered governor");
        assert_eq!(handle.statistics().initial_r, 1.5);
    }

    #[test]
    fn get_missing_name_is_none() {
        let registry = GovernorRegistry::new();
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let registry = GovernorRegistry::new();
        let a = registry.get_or_create("svc", 1.5);
        let b = registry.get_or_create("svc", 9.9);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.statistics().initial_r, 1.5);
    }

    #[test]
    fn remove_drops_the_entry() {
        let registry = GovernorRegistry::new();
        registry.register("svc", Governor::new(1.5));
        assert!(registry.remove("svc").is_some());
        assert!(registry.get("svc").is_none());
    }

    #[test]
    fn names_reflects_registered_entries() {
        let registry = GovernorRegistry::new();
        registry.register("a", Governor::new(1.0));
        registry.register("b", Governor::new(1.0));
        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn global_registry_is_reachable_and_shared() {
        global().register("global-smoke-test", Governor::new(1.5));
        assert!(global().get("global-smoke-test").is_some());
    }
}
