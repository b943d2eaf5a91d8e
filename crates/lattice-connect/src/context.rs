//! Shared client context: bounded caches for bean-name resolution and
//! method classification.
//!
//! One `MgmtContext` is shared by the dispatchers and proxies of a client.
//! Nothing here is process-global, so isolated instances coexist in tests.

use crate::dispatch::{classify_shape, MethodKey, MethodKind, MethodShape};
use crate::error::ChannelError;
use lattice_mgmt::BeanName;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

const NAME_CACHE_CAPACITY: usize = 512;
const METHOD_CACHE_CAPACITY: usize = 1024;

/// Bounded caches shared across dispatchers and proxies.
pub struct MgmtContext {
    names: Mutex<LruCache<String, BeanName>>,
    methods: Mutex<LruCache<MethodKey, MethodKind>>,
}

impl MgmtContext {
    pub fn new() -> Self {
        Self {
            names: Mutex::new(LruCache::new(
                NonZeroUsize::new(NAME_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
            methods: Mutex::new(LruCache::new(
                NonZeroUsize::new(METHOD_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// Resolve a textual bean name, caching the parsed form.
    pub fn resolve_name(&self, text: &str) -> Result<BeanName, ChannelError> {
        let mut cache = lock(&self.names);
        if let Some(name) = cache.get(text) {
            return Ok(name.clone());
        }
        let name = BeanName::parse(text)?;
        cache.put(text.to_string(), name.clone());
        Ok(name)
    }

    /// Classify a method shape, memoizing the result.
    ///
    /// The lock covers only the cache lookup and insert; callers run the
    /// classified invocation unlocked.
    pub fn classify(&self, shape: &MethodShape, param_types: &[String]) -> MethodKind {
        let key = MethodKey {
            name: shape.name.clone(),
            param_types: param_types.to_vec(),
        };
        let mut cache = lock(&self.methods);
        if let Some(kind) = cache.get(&key) {
            return kind.clone();
        }
        let kind = classify_shape(shape, param_types);
        cache.put(key, kind.clone());
        kind
    }

    #[cfg(test)]
    pub(crate) fn cached_names(&self) -> usize {
        lock(&self.names).len()
    }
}

impl Default for MgmtContext {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
