//! Drain protocol
//!
//! Coordinates removal of members from a group so that at most one member
//! holds permission to go away at any time. State lives entirely in
//! annotations on the member objects:
//!
//! - `started`: someone (a human, a script, a controller) asked for a drain.
//!   The value is a free-form reason.
//! - `acknowledged`: the owning controller saw the request and is working on
//!   it (e.g. moving traffic off the member).
//! - `finished`: the member may now be deleted.
//!
//! [`state_transitions`] is a pure function over a snapshot of member states.
//! Its output is written back with [`apply_state`] under the usual optimistic
//! concurrency rules. The rules below keep the single-finisher guarantee even
//! when snapshots lag or only part of a previous pass's output landed:
//!
//! - `Draining` always moves to `Acknowledged`.
//! - While anything is `Draining` or `Finished`, nothing is promoted.
//! - Otherwise the lexicographically first `Acknowledged` member is promoted
//!   to `Finished`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use kube::{Resource, ResourceExt};

use crate::error::{Error, Result};

/// Present when the object's controller participates in the drain protocol
pub const SUPPORTED_ANNOTATION: &str = "drain.dbcluster.io/supported";
pub const STARTED_ANNOTATION: &str = "drain.dbcluster.io/started";
pub const ACKNOWLEDGED_ANNOTATION: &str = "drain.dbcluster.io/acknowledged";
pub const FINISHED_ANNOTATION: &str = "drain.dbcluster.io/finished";

const SUPPORTED_VALUE: &str = "ensure that the drain protocol is followed before deleting";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DrainState {
    NotDraining,
    Draining,
    Acknowledged,
    Finished,
}

impl fmt::Display for DrainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainState::NotDraining => write!(f, "NotDraining"),
            DrainState::Draining => write!(f, "Draining"),
            DrainState::Acknowledged => write!(f, "Acknowledged"),
            DrainState::Finished => write!(f, "Finished"),
        }
    }
}

/// Whether `obj` is marked as following the drain protocol
pub fn supported<K: Resource>(obj: &K) -> bool {
    obj.annotations().contains_key(SUPPORTED_ANNOTATION)
}

pub fn mark_supported<K: Resource>(obj: &mut K) {
    obj.annotations_mut()
        .insert(SUPPORTED_ANNOTATION.to_string(), SUPPORTED_VALUE.to_string());
}

/// Derive the drain state of `obj` from its annotations.
///
/// `finished` without `acknowledged` is never produced by the protocol and is
/// reported as an error rather than guessed at.
pub fn get_state<K: Resource>(obj: &K) -> Result<DrainState> {
    let annotations = obj.annotations();
    let started = annotations.contains_key(STARTED_ANNOTATION);
    let acknowledged = annotations.contains_key(ACKNOWLEDGED_ANNOTATION);
    let finished = annotations.contains_key(FINISHED_ANNOTATION);

    match (started, acknowledged, finished) {
        (_, false, true) => Err(Error::InvalidDrainState {
            object: format!(
                "{}/{}",
                obj.namespace().unwrap_or_default(),
                obj.name_any()
            ),
            reason: format!(
                "{FINISHED_ANNOTATION} is set without {ACKNOWLEDGED_ANNOTATION}"
            ),
        }),
        (_, true, true) => Ok(DrainState::Finished),
        (_, true, false) => Ok(DrainState::Acknowledged),
        (true, false, false) => Ok(DrainState::Draining),
        (false, false, false) => Ok(DrainState::NotDraining),
    }
}

/// Request a drain. Keeps an existing request's reason.
pub fn start<K: Resource>(obj: &mut K, reason: &str) {
    obj.annotations_mut()
        .entry(STARTED_ANNOTATION.to_string())
        .or_insert_with(|| reason.to_string());
}

pub fn acknowledge<K: Resource>(obj: &mut K) {
    let annotations = obj.annotations_mut();
    annotations
        .entry(STARTED_ANNOTATION.to_string())
        .or_default();
    annotations
        .entry(ACKNOWLEDGED_ANNOTATION.to_string())
        .or_insert_with(now);
}

pub fn finish<K: Resource>(obj: &mut K) {
    acknowledge(obj);
    obj.annotations_mut()
        .entry(FINISHED_ANNOTATION.to_string())
        .or_insert_with(now);
}

/// Remove every drain annotation except `supported`
pub fn clear<K: Resource>(obj: &mut K) {
    if let Some(annotations) = obj.meta_mut().annotations.as_mut() {
        annotations.remove(STARTED_ANNOTATION);
        annotations.remove(ACKNOWLEDGED_ANNOTATION);
        annotations.remove(FINISHED_ANNOTATION);
    }
}

/// Make the annotations on `obj` describe `state`
pub fn apply_state<K: Resource>(obj: &mut K, state: DrainState) {
    match state {
        DrainState::NotDraining => clear(obj),
        DrainState::Draining => {
            let annotations = obj.annotations_mut();
            annotations.remove(ACKNOWLEDGED_ANNOTATION);
            annotations.remove(FINISHED_ANNOTATION);
            start(obj, "");
        }
        DrainState::Acknowledged => {
            obj.annotations_mut().remove(FINISHED_ANNOTATION);
            acknowledge(obj);
        }
        DrainState::Finished => finish(obj),
    }
}

/// Compute the next protocol step for a group of members.
///
/// Only entries that change are returned. `NotDraining` members never appear
/// in the output; starting a drain is always someone else's decision.
pub fn state_transitions<Id>(states: &BTreeMap<Id, DrainState>) -> BTreeMap<Id, DrainState>
where
    Id: Ord + Clone,
{
    let mut transitions = BTreeMap::new();
    let mut blocked = false;

    for (id, state) in states {
        match state {
            DrainState::Draining => {
                transitions.insert(id.clone(), DrainState::Acknowledged);
                blocked = true;
            }
            DrainState::Finished => blocked = true,
            DrainState::NotDraining | DrainState::Acknowledged => {}
        }
    }

    if !blocked {
        // BTreeMap iteration order is the lexicographic order of ids.
        if let Some((id, _)) = states
            .iter()
            .find(|(_, state)| **state == DrainState::Acknowledged)
        {
            transitions.insert(id.clone(), DrainState::Finished);
        }
    }

    transitions
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;
    use kube::api::ObjectMeta;

    fn pod(annotations: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("tablet-1".to_string()),
                namespace: Some("db".to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn states(entries: &[(&str, DrainState)]) -> BTreeMap<String, DrainState> {
        entries
            .iter()
            .map(|(id, state)| (id.to_string(), *state))
            .collect()
    }

    #[test]
    fn test_get_state_from_annotations() {
        assert_eq!(get_state(&pod(&[])).unwrap(), DrainState::NotDraining);
        assert_eq!(
            get_state(&pod(&[(STARTED_ANNOTATION, "resize")])).unwrap(),
            DrainState::Draining
        );
        assert_eq!(
            get_state(&pod(&[
                (STARTED_ANNOTATION, "resize"),
                (ACKNOWLEDGED_ANNOTATION, "t0")
            ]))
            .unwrap(),
            DrainState::Acknowledged
        );
        assert_eq!(
            get_state(&pod(&[
                (STARTED_ANNOTATION, "resize"),
                (ACKNOWLEDGED_ANNOTATION, "t0"),
                (FINISHED_ANNOTATION, "t1")
            ]))
            .unwrap(),
            DrainState::Finished
        );
    }

    #[test]
    fn test_finished_without_acknowledged_is_an_error() {
        let err = get_state(&pod(&[
            (STARTED_ANNOTATION, "resize"),
            (FINISHED_ANNOTATION, "t1"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidDrainState { ref object, .. } if object == "db/tablet-1"));
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_annotation_mutators_round_trip() {
        let mut p = pod(&[]);
        mark_supported(&mut p);
        assert!(supported(&p));

        start(&mut p, "scale down");
        assert_eq!(get_state(&p).unwrap(), DrainState::Draining);
        start(&mut p, "other reason");
        assert_eq!(p.annotations()[STARTED_ANNOTATION], "scale down");

        apply_state(&mut p, DrainState::Acknowledged);
        assert_eq!(get_state(&p).unwrap(), DrainState::Acknowledged);
        apply_state(&mut p, DrainState::Finished);
        assert_eq!(get_state(&p).unwrap(), DrainState::Finished);

        apply_state(&mut p, DrainState::NotDraining);
        assert_eq!(get_state(&p).unwrap(), DrainState::NotDraining);
        assert!(supported(&p));
    }

    #[test]
    fn test_draining_is_acknowledged_and_blocks_finish() {
        let got = state_transitions(&states(&[
            ("a", DrainState::Acknowledged),
            ("b", DrainState::Draining),
        ]));
        assert_eq!(got, states(&[("b", DrainState::Acknowledged)]));
    }

    #[test]
    fn test_first_acknowledged_is_finished() {
        let got = state_transitions(&states(&[
            ("c", DrainState::Acknowledged),
            ("a", DrainState::NotDraining),
            ("b", DrainState::Acknowledged),
        ]));
        assert_eq!(got, states(&[("b", DrainState::Finished)]));
    }

    #[test]
    fn test_existing_finish_blocks_another() {
        let got = state_transitions(&states(&[
            ("a", DrainState::Acknowledged),
            ("z", DrainState::Finished),
        ]));
        assert!(got.is_empty());
    }

    #[test]
    fn test_not_draining_never_changes() {
        let input = states(&[
            ("a", DrainState::NotDraining),
            ("b", DrainState::NotDraining),
        ]);
        assert!(state_transitions(&input).is_empty());
        assert!(state_transitions(&BTreeMap::<String, DrainState>::new()).is_empty());
    }
}
