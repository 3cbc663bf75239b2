// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Unit tests for `stack.rs`

#[cfg(test)]
mod tests {
    use super::super::{build_conditions, build_nodes, summarize};
    use crate::crd::{ChartSpec, Condition, DeploymentPhase, DeploymentState};
    use crate::reconcilers::scheduler::NodeOutcome;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn chart(name: &str, deps: &[&str], wait: bool, timeout: Option<&str>) -> ChartSpec {
        ChartSpec {
            name: name.to_string(),
            chart: None,
            repo: "r".to_string(),
            version: "1.0".to_string(),
            namespace: name.to_string(),
            release_name: name.to_string(),
            values: None,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            wait,
            timeout: timeout.map(str::to_string),
            create_namespace: true,
        }
    }

    fn outcome(state: DeploymentState) -> NodeOutcome {
        NodeOutcome {
            state,
            message: None,
        }
    }

    #[test]
    fn test_build_nodes_carries_chart_fields() {
        let charts = vec![
            chart("a", &[], true, None),
            chart("b", &["a"], false, Some("30s")),
        ];
        let nodes = build_nodes(&charts);

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "a");
        assert!(nodes[0].wait);
        assert_eq!(nodes[0].timeout, Duration::from_secs(600));

        assert_eq!(nodes[1].depends_on, vec!["a"]);
        assert!(!nodes[1].wait);
        assert_eq!(nodes[1].timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_summarize_deployed() {
        let outcomes = BTreeMap::from([
            ("a".to_string(), outcome(DeploymentState::Deployed)),
            ("b".to_string(), outcome(DeploymentState::Deployed)),
        ]);
        let (reason, message) = summarize(&outcomes, DeploymentPhase::Deployed);
        assert_eq!(reason, "DeploymentSucceeded");
        assert!(message.contains("all 2 charts"));
    }

    #[test]
    fn test_summarize_failed_counts_blocked() {
        let outcomes = BTreeMap::from([
            ("a".to_string(), outcome(DeploymentState::Failed)),
            ("b".to_string(), outcome(DeploymentState::Blocked)),
            ("c".to_string(), outcome(DeploymentState::Deployed)),
        ]);
        let (reason, message) = summarize(&outcomes, DeploymentPhase::Failed);
        assert_eq!(reason, "DeploymentFailed");
        assert!(message.contains("2/3"));
    }

    #[test]
    fn test_summarize_in_progress() {
        let outcomes = BTreeMap::from([
            ("a".to_string(), outcome(DeploymentState::Deployed)),
            ("b".to_string(), outcome(DeploymentState::Deploying)),
        ]);
        let (reason, message) = summarize(&outcomes, DeploymentPhase::Deploying);
        assert_eq!(reason, "DeploymentInProgress");
        assert!(message.contains("1/2"));
    }

    #[test]
    fn test_conditions_ready_only_when_deployed() {
        let conditions = build_conditions(
            &[],
            DeploymentPhase::Deployed,
            "DeploymentSucceeded",
            "done",
            false,
            false,
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].r#type, "Ready");
        assert_eq!(conditions[0].status, "True");

        let conditions = build_conditions(
            &[],
            DeploymentPhase::Deploying,
            "DeploymentInProgress",
            "going",
            false,
            false,
        );
        assert_eq!(conditions[0].status, "False");
    }

    #[test]
    fn test_conditions_include_toggles_when_enabled() {
        let conditions = build_conditions(
            &[],
            DeploymentPhase::Deployed,
            "DeploymentSucceeded",
            "done",
            true,
            true,
        );
        let types: Vec<&str> = conditions.iter().map(|c| c.r#type.as_str()).collect();
        assert_eq!(
            types,
            vec!["Ready", "SecurityScanned", "ObservabilityConfigured"]
        );
    }

    #[test]
    fn test_conditions_cycle_failure_reason() {
        let conditions = build_conditions(
            &[],
            DeploymentPhase::Failed,
            "CycleDetected",
            "dependency cycle detected involving 'a'",
            false,
            false,
        );
        assert_eq!(conditions[0].status, "False");
        assert_eq!(conditions[0].reason.as_deref(), Some("CycleDetected"));
    }

    #[test]
    fn test_conditions_preserve_transition_time_across_messages() {
        let prior = vec![Condition {
            r#type: "Ready".to_string(),
            status: "False".to_string(),
            reason: Some("DeploymentInProgress".to_string()),
            message: Some("0/2 charts deployed".to_string()),
            last_transition_time: Some("2025-06-01T00:00:00Z".to_string()),
        }];

        let conditions = build_conditions(
            &prior,
            DeploymentPhase::Deploying,
            "DeploymentInProgress",
            "1/2 charts deployed",
            false,
            false,
        );
        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some("2025-06-01T00:00:00Z")
        );
    }
}
