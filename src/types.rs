use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, RwLock},
};

use crate::{error::SmallError, utils::HandyRwLock};

// Type alias, not a new type, cannot define methods on it
pub type Pod<T> = Arc<RwLock<T>>;

pub type ResultPod<T> = Result<Pod<T>, SmallError>;
pub type SmallResult = Result<(), SmallError>;

/// A `HashMap` wrapped in an `Arc<RwLock>` so it can be shared between
/// threads and mutated behind a shared reference.
pub struct ConcurrentHashMap<K, V> {
    inner: Pod<HashMap<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> ConcurrentHashMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn get_inner(&self) -> Pod<HashMap<K, V>> {
        Arc::clone(&self.inner)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.rl().get(key).cloned()
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.wl().insert(key, value);
    }

    /// Return the value for `key`, constructing and inserting it via
    /// `f` when absent.
    pub fn get_or_insert<F>(&self, key: &K, f: F) -> Result<V, SmallError>
    where
        F: FnOnce(&K) -> Result<V, SmallError>,
    {
        {
            let inner = self.inner.rl();
            if let Some(v) = inner.get(key) {
                return Ok(v.clone());
            }
        }

        let mut inner = self.inner.wl();
        if let Some(v) = inner.get(key) {
            return Ok(v.clone());
        }
        let v = f(key)?;
        inner.insert(key.clone(), v.clone());
        Ok(v)
    }

    pub fn remove(&self, key: &K) {
        self.inner.wl().remove(key);
    }

    pub fn clear(&self) {
        self.inner.wl().clear();
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.rl().keys().cloned().collect()
    }

    /// Mutate the value for `key` in place, inserting the default
    /// value first when absent.
    pub fn alter_value<F>(&self, key: &K, f: F) -> SmallResult
    where
        V: Default,
        F: FnOnce(&mut V) -> SmallResult,
    {
        let mut inner = self.inner.wl();
        let v = inner.entry(key.clone()).or_insert_with(V::default);
        f(v)
    }

    /// Return true when the slot for `key` is either empty or holds
    /// exactly `value`.
    pub fn exact_or_empty(&self, key: &K, value: &V) -> bool
    where
        V: PartialEq,
    {
        match self.inner.rl().get(key) {
            Some(v) => v == value,
            None => true,
        }
    }
}
