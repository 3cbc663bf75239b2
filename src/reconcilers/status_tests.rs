// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Unit tests for `status.rs`

#[cfg(test)]
mod tests {
    use crate::crd::Condition;
    use crate::reconcilers::status::{
        conditions_changed, create_condition, find_condition, transition,
    };

    #[test]
    fn test_create_condition_sets_all_fields() {
        let condition = create_condition("Ready", "True", "DeploymentSucceeded", "all good");
        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.reason.as_deref(), Some("DeploymentSucceeded"));
        assert_eq!(condition.message.as_deref(), Some("all good"));
        assert!(condition.last_transition_time.is_some());
    }

    #[test]
    fn test_find_condition() {
        let conditions = vec![
            create_condition("Ready", "False", "Pending", "waiting"),
            create_condition("SecurityScanned", "True", "ScanRequested", "requested"),
        ];
        assert!(find_condition(&conditions, "SecurityScanned").is_some());
        assert!(find_condition(&conditions, "Missing").is_none());
    }

    #[test]
    fn test_transition_preserves_time_when_status_unchanged() {
        let existing = vec![Condition {
            r#type: "Ready".to_string(),
            status: "False".to_string(),
            reason: Some("Pending".to_string()),
            message: Some("waiting".to_string()),
            last_transition_time: Some("2025-01-01T00:00:00Z".to_string()),
        }];

        let updated = transition(
            &existing,
            create_condition("Ready", "False", "DeploymentInProgress", "1/3 charts deployed"),
        );

        // Message and reason changed but status did not: the transition
        // time must be carried over
        assert_eq!(
            updated.last_transition_time.as_deref(),
            Some("2025-01-01T00:00:00Z")
        );
        assert_eq!(updated.reason.as_deref(), Some("DeploymentInProgress"));
    }

    #[test]
    fn test_transition_moves_time_when_status_flips() {
        let existing = vec![Condition {
            r#type: "Ready".to_string(),
            status: "False".to_string(),
            reason: Some("Pending".to_string()),
            message: None,
            last_transition_time: Some("2025-01-01T00:00:00Z".to_string()),
        }];

        let updated = transition(
            &existing,
            create_condition("Ready", "True", "DeploymentSucceeded", "done"),
        );

        assert_ne!(
            updated.last_transition_time.as_deref(),
            Some("2025-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_transition_with_no_prior_condition_keeps_fresh_time() {
        let updated = transition(&[], create_condition("Ready", "True", "Ok", "fine"));
        assert!(updated.last_transition_time.is_some());
    }

    #[test]
    fn test_conditions_changed_detects_length_difference() {
        let a = vec![create_condition("Ready", "True", "Ok", "fine")];
        assert!(conditions_changed(&a, &[]));
    }

    #[test]
    fn test_conditions_changed_detects_status_difference() {
        let a = vec![create_condition("Ready", "True", "Ok", "fine")];
        let b = vec![create_condition("Ready", "False", "Ok", "fine")];
        assert!(conditions_changed(&a, &b));
    }

    #[test]
    fn test_conditions_changed_ignores_timestamps() {
        let mut a = vec![create_condition("Ready", "True", "Ok", "fine")];
        let b = vec![create_condition("Ready", "True", "Ok", "fine")];
        a[0].last_transition_time = Some("1999-01-01T00:00:00Z".to_string());
        assert!(!conditions_changed(&a, &b));
    }
}
