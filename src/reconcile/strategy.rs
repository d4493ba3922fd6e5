//! Per-kind behavior plugged into the reconciliation engine

use std::fmt::Debug;

use kube::Resource;
use serde::Serialize;

use super::store::PropagationPolicy;
use crate::key::ObjectKey;

/// Bounds every child kind handled by the engine must meet
pub trait Child:
    Resource<DynamicType = ()> + Clone + PartialEq + Serialize + Debug + Send + Sync + 'static
{
}

impl<T> Child for T where
    T: Resource<DynamicType = ()> + Clone + PartialEq + Serialize + Debug + Send + Sync + 'static
{
}

/// How released disruptive changes are applied
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpdateMode {
    /// Delete the object; the next pass creates it from scratch
    #[default]
    RollingRecreate,
    /// Write the disruptive change onto the live object
    RollingInPlace,
}

/// Why a turndown candidate was kept
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrphanStatus {
    pub reason: String,
    pub message: String,
}

impl OrphanStatus {
    pub fn new(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// Caller-supplied behavior for one kind of child object.
///
/// Update hooks receive a copy of the live object and should only assign the
/// fields they own. The engine compares the result with the live object to
/// decide whether anything needs writing, so a hook that turns an absent
/// field into an empty one causes a write on every pass.
pub trait Strategy<K: Child>: Send {
    /// Build the desired object from scratch. The engine fills in name,
    /// namespace, selector labels and the owner reference.
    fn new_object(&self, key: &ObjectKey) -> K;

    /// Apply changes that are safe to make without disruption
    fn update_in_place(&self, _key: &ObjectKey, _obj: &mut K) {}

    /// Apply disruptive changes when the update mode is
    /// [`UpdateMode::RollingInPlace`]
    fn update_rolling_in_place(&self, _key: &ObjectKey, _obj: &mut K) {}

    /// Apply disruptive changes when the update mode is
    /// [`UpdateMode::RollingRecreate`]. Any difference means the object gets
    /// recreated once released.
    fn update_rolling_recreate(&self, _key: &ObjectKey, _obj: &mut K) {}

    fn update_mode(&self) -> UpdateMode {
        UpdateMode::default()
    }

    fn delete_propagation(&self) -> PropagationPolicy {
        PropagationPolicy::default()
    }

    /// Called once per pass for every object that exists, including ones
    /// kept from turndown
    fn status(&mut self, _key: &ObjectKey, _obj: &K) {}

    /// Return `Some` to keep an undesired object for now
    fn prepare_for_turndown(&mut self, _key: &ObjectKey, _obj: &K) -> Option<OrphanStatus> {
        None
    }

    /// Record that `obj` was kept from turndown
    fn orphan_status(&mut self, _key: &ObjectKey, _obj: &K, _status: &OrphanStatus) {}
}
