//! The context's typed key-value store.
//!
//! Keys are triple-dotted namespaces (e.g. `routecraft.adapter.direct.store`)
//! by convention; adapters "extend" the store by agreeing on a key and the
//! Rust type stored under it. Values are type-erased at rest and downcast
//! on read, the way `http::Extensions` / `tower`'s request extensions work.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;

/// Reserved store key: the direct adapter's discovery entries
/// (`Vec<`[`crate::direct::DiscoveryEntry`]`>`), published by `DirectSource`
/// at subscribe time so other components can read it via the context store.
pub const STORE_DIRECT_REGISTRY: &str = "routecraft.adapter.direct.registry";

/// A typed, namespaced key-value map owned by one [`crate::context::Context`].
///
/// Safe for concurrent reader access; writes are single-operation atomic via
/// the underlying `DashMap`, matching the "no long-running lock" guidance of
/// spec.md §5.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<DashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl Store {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value under `key`, overwriting any prior value (and type).
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.inner.insert(key.into(), Arc::new(value));
    }

    /// Gets the value under `key`, if present and of type `T`.
    #[must_use]
    pub fn get<T: Any + Send + Sync + Clone>(&self, key: &str) -> Option<T> {
        self.inner
            .get(key)
            .and_then(|v| v.downcast_ref::<T>().cloned())
    }

    /// Gets (without cloning the value out) and applies `f` to it, if
    /// present and of type `T`. Useful for types that are themselves cheap
    /// `Arc`-backed handles (channels, registries) where `get` would need
    /// an extra clone bound.
    pub fn with<T: Any + Send + Sync, R>(&self, key: &str, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.inner.get(key).and_then(|v| v.downcast_ref::<T>().map(f))
    }

    /// Gets the value under `key`, inserting `default_fn()`'s result first
    /// if absent.
    pub fn get_or_insert_with<T: Any + Send + Sync + Clone>(
        &self,
        key: &str,
        default_fn: impl FnOnce() -> T,
    ) -> T {
        if let Some(existing) = self.get::<T>(key) {
            return existing;
        }
        let value = default_fn();
        self.inner
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(value.clone()));
        self.get::<T>(key).unwrap_or(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_roundtrip() {
        let store = Store::new();
        store.set("vendor.adapter.purpose", 42_i32);
        assert_eq!(store.get::<i32>("vendor.adapter.purpose"), Some(42));
    }

    #[test]
    fn get_wrong_type_is_none() {
        let store = Store::new();
        store.set("k", 42_i32);
        assert_eq!(store.get::<String>("k"), None);
    }

    #[test]
    fn get_or_insert_with_only_runs_once() {
        let store = Store::new();
        let calls = std::sync::atomic::AtomicUsize::new(0);
        for _ in 0..3 {
            store.get_or_insert_with::<i32>("k", || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                7
            });
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
