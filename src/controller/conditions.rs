//! Condition management helpers following Kubernetes API conventions

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::key::ObjectKey;
use crate::reconcile::OrphanStatus;

/// Children kept from turndown by a strategy
pub const CONDITION_TYPE_TURNDOWN_BLOCKED: &str = "TurndownBlocked";

/// Standard condition statuses
pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";

/// Status condition as stored on parent objects
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub last_transition_time: String,
    pub reason: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Update or add a condition to the conditions list
///
/// The transition time only moves when the status changes.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status != condition.status {
                existing.last_transition_time = condition.last_transition_time;
            }
            existing.status = condition.status;
            existing.reason = condition.reason;
            existing.message = condition.message;
            existing.observed_generation = condition.observed_generation;
        }
        None => conditions.push(condition),
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}

/// Summarize the children kept from turndown during a pass.
///
/// The reason is shared when every orphan agrees on one, `Multiple`
/// otherwise. The message lists each kept child.
pub fn turndown_condition(orphans: &BTreeMap<ObjectKey, OrphanStatus>) -> Condition {
    let now = Utc::now().to_rfc3339();
    if orphans.is_empty() {
        return Condition {
            type_: CONDITION_TYPE_TURNDOWN_BLOCKED.to_string(),
            status: CONDITION_STATUS_FALSE.to_string(),
            last_transition_time: now,
            reason: "NothingBlocked".to_string(),
            message: "No children are waiting for turndown".to_string(),
            observed_generation: None,
        };
    }

    let mut reasons = orphans.values().map(|o| o.reason.as_str());
    let first = reasons.next().unwrap_or_default();
    let reason = if reasons.all(|r| r == first) {
        first.to_string()
    } else {
        "Multiple".to_string()
    };
    let message = orphans
        .iter()
        .map(|(key, status)| format!("{key}: {}", status.message))
        .collect::<Vec<_>>()
        .join("; ");

    Condition {
        type_: CONDITION_TYPE_TURNDOWN_BLOCKED.to_string(),
        status: CONDITION_STATUS_TRUE.to_string(),
        last_transition_time: now,
        reason,
        message,
        observed_generation: None,
    }
}
