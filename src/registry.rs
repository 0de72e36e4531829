use crate::{Builder, Factory, FactoryResult};
use dashmap::DashMap;
use std::sync::{Arc, LazyLock};

static FACTORIES: LazyLock<DashMap<String, Arc<Factory>>> = LazyLock::new(DashMap::new);

const DEFAULT_KEY: &str = "__DEFAULT__";

/// The factory registered under `key`, if any.
#[must_use]
pub fn get_factory(key: &str) -> Option<Arc<Factory>> {
    FACTORIES.get(key).map(|factory| Arc::clone(&factory))
}

/// Registers a factory under `key` if the key is free, and returns the
/// registered factory either way. Safe to call concurrently: the first
/// registration wins.
#[must_use]
pub fn register_factory(key: &str, factory: Arc<Factory>) -> Arc<Factory> {
    FACTORIES
        .entry(key.to_owned())
        .or_insert(factory)
        .clone()
}

/// Unregisters `factory` from `key`. Does nothing (and returns `false`)
/// when another factory is registered there.
pub fn unregister_factory(key: &str, factory: &Arc<Factory>) -> bool {
    FACTORIES
        .remove_if(key, |_, registered| Arc::ptr_eq(registered, factory))
        .is_some()
}

/// Drops every registered factory. A test hook.
pub fn clear_factory_registry() {
    FACTORIES.clear();
}

impl Factory {
    /// Builds a factory the default way: plugin rules plus the calling
    /// thread's overlay.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Builder::build`].
    pub fn new_instance() -> FactoryResult<Arc<Factory>> {
        let mut builder = Builder::new();
        builder.add_plugin_rules().add_thread_overlay();
        builder.build()
    }

    /// The process-wide default factory, built from plugin rules only and
    /// registered on first use. Never close it except on process shutdown;
    /// it is probably shared among several usages.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Builder::build`].
    pub fn default_instance() -> FactoryResult<Arc<Factory>> {
        if let Some(factory) = get_factory(DEFAULT_KEY) {
            return Ok(factory);
        }
        let mut builder = Builder::new();
        builder.add_plugin_rules();
        Ok(register_factory(DEFAULT_KEY, builder.build()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_first_writer_wins() {
        let first = Builder::new().build().unwrap();
        let second = Builder::new().build().unwrap();
        let registered = register_factory("registry-test", Arc::clone(&first));
        assert!(Arc::ptr_eq(&first, &registered));
        let registered = register_factory("registry-test", Arc::clone(&second));
        assert!(Arc::ptr_eq(&first, &registered));

        assert!(!unregister_factory("registry-test", &second));
        assert!(unregister_factory("registry-test", &first));
        assert!(get_factory("registry-test").is_none());
    }
}
