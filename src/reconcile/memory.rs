//! In-memory [`ObjectStore`] with resource versions and failure injection
//!
//! Behaves like the API server where the engine can tell the difference:
//! names are unique per namespace, replaces are checked against the stored
//! resource version, and deletes of missing objects are not-found.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};

use super::store::{ObjectStore, PropagationPolicy};
use crate::error::{Error, Result};
use crate::key::{matches_labels, ObjectKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Replace,
    Delete,
}

#[derive(Debug)]
struct State<K> {
    objects: BTreeMap<ObjectKey, K>,
    next_version: u64,
    log: Vec<(Operation, ObjectKey)>,
    unavailable: BTreeSet<String>,
    conflicting: BTreeSet<String>,
    lists_fail: bool,
}

#[derive(Debug)]
pub struct MemoryStore<K> {
    state: Mutex<State<K>>,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                next_version: 1,
                log: Vec::new(),
                unavailable: BTreeSet::new(),
                conflicting: BTreeSet::new(),
                lists_fail: false,
            }),
        }
    }
}

impl<K> MemoryStore<K>
where
    K: Resource + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State<K>> {
        // A panic while holding the lock only happens in a failing test.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Put `obj` into the store without going through the write path
    pub fn seed(&self, mut obj: K) -> K {
        let mut state = self.lock();
        let version = state.next_version;
        state.next_version += 1;
        obj.meta_mut().resource_version = Some(version.to_string());
        state
            .objects
            .insert(ObjectKey::from_resource(&obj), obj.clone());
        obj
    }

    pub fn object(&self, key: &ObjectKey) -> Option<K> {
        self.lock().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Every successful write, in order
    pub fn operations(&self) -> Vec<(Operation, ObjectKey)> {
        self.lock().log.clone()
    }

    pub fn count(&self, op: Operation, key: &ObjectKey) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|(o, k)| *o == op && k == key)
            .count()
    }

    /// Make every write to objects named `name` fail as unavailable
    pub fn fail_writes_to(&self, name: &str) {
        self.lock().unavailable.insert(name.to_string());
    }

    /// Make every write to objects named `name` fail with a conflict
    pub fn conflict_writes_to(&self, name: &str) {
        self.lock().conflicting.insert(name.to_string());
    }

    /// Make every list fail as unavailable
    pub fn fail_lists(&self) {
        self.lock().lists_fail = true;
    }

    pub fn heal(&self) {
        let mut state = self.lock();
        state.unavailable.clear();
        state.conflicting.clear();
        state.lists_fail = false;
    }
}

impl<K> State<K> {
    fn check_injected(&self, key: &ObjectKey) -> Result<()> {
        if self.unavailable.contains(&key.name) {
            return Err(Error::StoreUnavailable(key.to_string()));
        }
        if self.conflicting.contains(&key.name) {
            return Err(Error::Conflict(key.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn list(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<K>> {
        let state = self.lock();
        if state.lists_fail {
            return Err(Error::StoreUnavailable(format!("list {namespace}")));
        }
        Ok(state
            .objects
            .iter()
            .filter(|(key, obj)| key.namespace == namespace && matches_labels(*obj, selector))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        Ok(self.object(key))
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::from_resource(obj);
        let mut state = self.lock();
        state.check_injected(&key)?;
        if state.objects.contains_key(&key) {
            return Err(Error::Conflict(format!("{key} already exists")));
        }
        let mut stored = obj.clone();
        let version = state.next_version;
        state.next_version += 1;
        stored.meta_mut().resource_version = Some(version.to_string());
        if stored.uid().is_none() {
            stored.meta_mut().uid = Some(format!("uid-{version}"));
        }
        state.objects.insert(key.clone(), stored.clone());
        state.log.push((Operation::Create, key));
        Ok(stored)
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::from_resource(obj);
        let mut state = self.lock();
        state.check_injected(&key)?;
        let current_version = match state.objects.get(&key) {
            Some(current) => current.resource_version(),
            None => return Err(Error::NotFound(key.to_string())),
        };
        if obj.resource_version() != current_version {
            return Err(Error::Conflict(key.to_string()));
        }
        let mut stored = obj.clone();
        let version = state.next_version;
        state.next_version += 1;
        stored.meta_mut().resource_version = Some(version.to_string());
        state.objects.insert(key.clone(), stored.clone());
        state.log.push((Operation::Replace, key));
        Ok(stored)
    }

    async fn delete(&self, key: &ObjectKey, _propagation: PropagationPolicy) -> Result<()> {
        let mut state = self.lock();
        state.check_injected(key)?;
        if state.objects.remove(key).is_none() {
            return Err(Error::NotFound(key.to_string()));
        }
        state.log.push((Operation::Delete, key.clone()));
        Ok(())
    }
}
