//! Rollout protocol
//!
//! Disruptive changes are never applied as soon as they are computed.
//! Instead the object is marked `scheduled`, and something with a wider view
//! (a per-controller policy, or a human) decides when it is `released`. Only
//! then does the reconciliation engine apply the change. A parent marked
//! `cascade` asks its controller to keep releasing children until none are
//! left scheduled.
//!
//! The three annotations are independent flags.

use std::cmp::Ordering;

use kube::{Resource, ResourceExt};

use crate::drain::DrainState;

pub const SCHEDULED_ANNOTATION: &str = "rollout.dbcluster.io/scheduled";
pub const RELEASED_ANNOTATION: &str = "rollout.dbcluster.io/released";
pub const CASCADE_ANNOTATION: &str = "rollout.dbcluster.io/cascade";

/// Mark a pending disruptive change. `description` says what would change.
pub fn schedule<K: Resource>(obj: &mut K, description: &str) {
    obj.annotations_mut()
        .insert(SCHEDULED_ANNOTATION.to_string(), description.to_string());
}

pub fn unschedule<K: Resource>(obj: &mut K) {
    remove_annotation(obj, SCHEDULED_ANNOTATION);
}

pub fn scheduled<K: Resource>(obj: &K) -> bool {
    obj.annotations().contains_key(SCHEDULED_ANNOTATION)
}

pub fn release<K: Resource>(obj: &mut K) {
    obj.annotations_mut()
        .insert(RELEASED_ANNOTATION.to_string(), "true".to_string());
}

pub fn unrelease<K: Resource>(obj: &mut K) {
    remove_annotation(obj, RELEASED_ANNOTATION);
}

pub fn released<K: Resource>(obj: &K) -> bool {
    obj.annotations().contains_key(RELEASED_ANNOTATION)
}

/// Ask the controller of `parent` to release all scheduled children in turn
pub fn cascade<K: Resource>(parent: &mut K) {
    parent
        .annotations_mut()
        .insert(CASCADE_ANNOTATION.to_string(), "true".to_string());
}

pub fn uncascade<K: Resource>(parent: &mut K) {
    remove_annotation(parent, CASCADE_ANNOTATION);
}

pub fn cascading<K: Resource>(parent: &K) -> bool {
    parent.annotations().contains_key(CASCADE_ANNOTATION)
}

// Leaves an absent annotation map absent, so clearing a flag that was never
// set does not register as a change.
fn remove_annotation<K: Resource>(obj: &mut K, key: &str) {
    if let Some(annotations) = obj.meta_mut().annotations.as_mut() {
        annotations.remove(key);
    }
}

/// One group member as seen by [`next_release`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseCandidate {
    pub id: String,
    pub scheduled: bool,
    pub released: bool,
    pub healthy: bool,
    pub primary: bool,
    pub drain: DrainState,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReleaseDecision {
    /// Release this member now
    Release(String),
    /// A release is in flight; check again later
    Wait,
    /// A released member is unhealthy; stop cascading
    Abort(String),
    /// Nothing is scheduled; the cascade can be cleared
    Done,
}

/// Pick the next member of a cascading group to release.
///
/// A released member that is unhealthy aborts the cascade. Only one member is
/// in flight at a time. Non-primary members go first, the furthest-drained
/// among them first, ties broken by id; the primary goes last.
pub fn next_release(candidates: &[ReleaseCandidate]) -> ReleaseDecision {
    if let Some(sick) = candidates.iter().find(|c| c.released && !c.healthy) {
        return ReleaseDecision::Abort(sick.id.clone());
    }
    if candidates.iter().any(|c| c.released && c.scheduled) {
        return ReleaseDecision::Wait;
    }

    let next = candidates
        .iter()
        .filter(|c| c.scheduled && !c.released)
        .min_by(|a, b| release_order(a, b));

    match next {
        Some(c) => ReleaseDecision::Release(c.id.clone()),
        None => ReleaseDecision::Done,
    }
}

fn release_order(a: &ReleaseCandidate, b: &ReleaseCandidate) -> Ordering {
    a.primary
        .cmp(&b.primary)
        .then_with(|| drain_rank(b.drain).cmp(&drain_rank(a.drain)))
        .then_with(|| a.id.cmp(&b.id))
}

fn drain_rank(state: DrainState) -> u8 {
    match state {
        DrainState::NotDraining => 0,
        DrainState::Draining => 1,
        DrainState::Acknowledged => 2,
        DrainState::Finished => 3,
    }
}
