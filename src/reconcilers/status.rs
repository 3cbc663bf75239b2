// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Status condition helpers for Stack and Pipeline resources.
//!
//! Conditions follow the standard Kubernetes conventions:
//! - `type`: the aspect being reported (`Ready`, `SecurityScanned`, ...)
//! - `status`: `True`, `False`, or `Unknown`
//! - `reason`: a programmatic CamelCase identifier
//! - `message`: a human-readable explanation
//! - `lastTransitionTime`: RFC3339 timestamp of the last *status* change
//!
//! `lastTransitionTime` is preserved when only the reason or message changes;
//! it moves only when `status` flips.

use crate::crd::Condition;
use chrono::Utc;

/// Create a new condition with the current timestamp.
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Find a condition by type in a list of conditions.
#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Fold a freshly computed condition into the previous condition list,
/// preserving `lastTransitionTime` when the status value has not changed.
///
/// Returns the condition to store.
#[must_use]
pub fn transition(existing: &[Condition], mut new_condition: Condition) -> Condition {
    if let Some(current) = find_condition(existing, &new_condition.r#type) {
        if current.status == new_condition.status {
            new_condition.last_transition_time = current.last_transition_time.clone();
        }
    }
    new_condition
}

/// Check whether two condition lists differ in anything that warrants a
/// status write (type, status, reason, or message).
#[must_use]
pub fn conditions_changed(current: &[Condition], new: &[Condition]) -> bool {
    if current.len() != new.len() {
        return true;
    }
    current.iter().zip(new.iter()).any(|(a, b)| {
        a.r#type != b.r#type
            || a.status != b.status
            || a.reason != b.reason
            || a.message != b.message
    })
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
