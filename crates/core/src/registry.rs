//! Generic keyed lookup for builder functions.
//!
//! Every "pick a builder for this discriminant, else use a default" site
//! (event rendering, toolset construction) goes through [`Registry`] and
//! [`Factory`] instead of a hand-written match.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};

/// Thread-safe map from a key to a value. `register` overwrites.
pub struct Registry<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V: Clone> Registry<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: K, value: V) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Clone + Ord, V> Registry<K, V> {
    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<K> {
        let mut keys: Vec<K> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

/// Builder lookup over a shared [`Registry`] with an optional fallback.
pub struct Factory<K, B> {
    registry: Arc<Registry<K, B>>,
    fallback: Option<B>,
}

impl<K: Eq + Hash, B: Clone> Factory<K, B> {
    pub fn new(registry: Arc<Registry<K, B>>) -> Self {
        Self {
            registry,
            fallback: None,
        }
    }

    /// Builder used when no key matches.
    pub fn with_fallback(mut self, fallback: B) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn registry(&self) -> &Arc<Registry<K, B>> {
        &self.registry
    }

    /// The builder registered for `key`, without the fallback.
    pub fn get_builder<Q>(&self, key: &Q) -> Option<B>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.registry.get(key)
    }

    /// The builder for `key`, else the fallback.
    pub fn resolve<Q>(&self, key: &Q) -> Option<B>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.get_builder(key).or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Render = fn(&str) -> String;

    fn upper(s: &str) -> String {
        s.to_uppercase()
    }

    fn plain(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn register_overwrites_and_get_reports_missing() {
        let registry: Registry<String, u32> = Registry::new();
        registry.register("a".into(), 1);
        registry.register("a".into(), 2);
        assert_eq!(registry.get("a"), Some(2));
        assert_eq!(registry.get("b"), None);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("a"));
    }

    #[test]
    fn keys_are_sorted() {
        let registry: Registry<String, ()> = Registry::new();
        for key in ["shell", "filesystem", "memory"] {
            registry.register(key.into(), ());
        }
        assert_eq!(registry.keys(), vec!["filesystem", "memory", "shell"]);
    }

    #[test]
    fn factory_falls_back_to_default_builder() {
        let registry: Arc<Registry<String, Render>> = Arc::new(Registry::new());
        registry.register("shout".into(), upper);
        let factory = Factory::new(Arc::clone(&registry)).with_fallback(plain as Render);

        assert_eq!(factory.resolve("shout").unwrap()("hi"), "HI");
        assert_eq!(factory.resolve("other").unwrap()("hi"), "hi");
        assert!(factory.get_builder("other").is_none());
    }

    #[test]
    fn factory_sees_later_registrations() {
        let registry: Arc<Registry<String, Render>> = Arc::new(Registry::new());
        let factory = Factory::new(Arc::clone(&registry));
        assert!(factory.resolve("shout").is_none());

        registry.register("shout".into(), upper);
        assert!(factory.resolve("shout").is_some());
    }
}
