//! Object identities and ownership
//!
//! An [`ObjectKey`] names a child object in the store; a [`Parent`] is the
//! owning object whose UID goes into owner references and whose labels
//! select its children.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::reflector::ObjectRef;
use kube::{Resource, ResourceExt};

/// (namespace, name) pair identifying an object in the store
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing object. Cluster-scoped objects get an empty namespace.
    pub fn from_resource<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
        }
    }

    /// Reference usable as a reconcile trigger for a kube-runtime controller
    pub fn object_ref<K>(&self) -> ObjectRef<K>
    where
        K: Resource<DynamicType = ()>,
    {
        let obj_ref = ObjectRef::new(&self.name);
        if self.namespace.is_empty() {
            obj_ref
        } else {
            obj_ref.within(&self.namespace)
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The object that owns a set of generated children
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parent {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

impl Parent {
    pub fn from_resource<K>(obj: &K) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self {
            api_version: K::api_version(&()).to_string(),
            kind: K::kind(&()).to_string(),
            name: obj.name_any(),
            namespace: obj.namespace().unwrap_or_default(),
            uid: obj.uid().unwrap_or_default(),
        }
    }

    /// Controller owner reference stamped onto every child
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Whether `obj` carries an owner reference to this parent
    pub fn owns<K: Resource>(&self, obj: &K) -> bool {
        !self.uid.is_empty() && obj.owner_references().iter().any(|o| o.uid == self.uid)
    }

    /// Add the controller owner reference to `obj` unless already present
    pub fn adopt<K: Resource>(&self, obj: &mut K) {
        if self.owns(obj) {
            return;
        }
        obj.meta_mut()
            .owner_references
            .get_or_insert_with(Vec::new)
            .push(self.owner_reference());
    }
}

/// Render a label map as an equality-based selector (`a=1,b=2`)
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether every selector label is present on `obj` with the same value
pub fn matches_labels<K: Resource>(obj: &K, selector: &BTreeMap<String, String>) -> bool {
    let labels = obj.labels();
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}
