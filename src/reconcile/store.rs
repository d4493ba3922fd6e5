//! Boundary to the declarative API store
//!
//! The engine only needs CRUD with optimistic concurrency on update. Kube is
//! the production backend; tests use `MemoryStore` (feature `test-utils`).

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::key::{selector_string, ObjectKey};

/// How dependents of a deleted object are cleaned up
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PropagationPolicy {
    #[default]
    Background,
    Foreground,
    Orphan,
}

impl PropagationPolicy {
    fn delete_params(self) -> DeleteParams {
        match self {
            PropagationPolicy::Background => DeleteParams::background(),
            PropagationPolicy::Foreground => DeleteParams::foreground(),
            PropagationPolicy::Orphan => DeleteParams::orphan(),
        }
    }
}

#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// Objects in `namespace` carrying every label in `selector`
    async fn list(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<K>>;

    async fn get(&self, key: &ObjectKey) -> Result<Option<K>>;

    /// Fails with [`Error::Conflict`] if the name is taken
    async fn create(&self, obj: &K) -> Result<K>;

    /// Replace the stored object. The write carries `obj`'s resource version
    /// and fails with [`Error::Conflict`] if someone else wrote first.
    async fn replace(&self, obj: &K) -> Result<K>;

    async fn delete(&self, key: &ObjectKey, propagation: PropagationPolicy) -> Result<()>;
}

/// [`ObjectStore`] over the Kubernetes API
pub struct KubeStore<K> {
    client: Client,
    field_manager: String,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(self.field_manager.clone()),
        }
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn list(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<K>> {
        let params = ListParams::default().labels(&selector_string(selector));
        let list = self
            .api(namespace)
            .list(&params)
            .await
            .map_err(|e| Error::from_kube(e, format!("{}/{}", namespace, K::kind(&()))))?;
        Ok(list.items)
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        self.api(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(|e| Error::from_kube(e, key.to_string()))
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::from_resource(obj);
        self.api(&key.namespace)
            .create(&self.post_params(), obj)
            .await
            .map_err(|e| Error::from_kube(e, key.to_string()))
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::from_resource(obj);
        self.api(&key.namespace)
            .replace(&key.name, &self.post_params(), obj)
            .await
            .map_err(|e| Error::from_kube(e, key.to_string()))
    }

    async fn delete(&self, key: &ObjectKey, propagation: PropagationPolicy) -> Result<()> {
        self.api(&key.namespace)
            .delete(&key.name, &propagation.delete_params())
            .await
            .map_err(|e| Error::from_kube(e, key.to_string()))?;
        debug!("Delete of {} {} accepted", K::kind(&()), key);
        Ok(())
    }
}
