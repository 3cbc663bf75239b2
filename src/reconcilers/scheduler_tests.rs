// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Unit tests for `scheduler.rs`
//!
//! The executor is scripted: each node resolves to a preconfigured state,
//! and the tests assert on wave ordering, blocking, and phase aggregation.

#[cfg(test)]
mod tests {
    use crate::crd::{DeploymentPhase, DeploymentState};
    use crate::reconcilers::scheduler::{
        aggregate_phase, run_schedule, topo_order, DagNode, NodeExecutor, NodeOutcome,
        SchedulerError,
    };
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    fn node(name: &str, deps: &[&str], wait: bool) -> DagNode {
        DagNode {
            name: name.to_string(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            wait,
            timeout: Duration::from_secs(600),
        }
    }

    /// Executor that returns a scripted state per node and records the
    /// order nodes were executed in.
    struct ScriptedExecutor {
        nodes: Vec<DagNode>,
        states: BTreeMap<String, DeploymentState>,
        executed: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new(nodes: &[DagNode], states: &[(&str, DeploymentState)]) -> Self {
            Self {
                nodes: nodes.to_vec(),
                states: states
                    .iter()
                    .map(|(name, state)| (name.to_string(), *state))
                    .collect(),
                executed: Mutex::new(Vec::new()),
            }
        }

        fn executed(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NodeExecutor for ScriptedExecutor {
        async fn execute(&self, index: usize) -> NodeOutcome {
            let name = self.nodes[index].name.clone();
            self.executed.lock().unwrap().push(name.clone());
            NodeOutcome {
                state: self
                    .states
                    .get(&name)
                    .copied()
                    .unwrap_or(DeploymentState::Deployed),
                message: None,
            }
        }
    }

    #[test]
    fn test_topo_order_respects_dependencies() {
        let nodes = vec![
            node("c", &["b"], true),
            node("b", &["a"], true),
            node("a", &[], true),
        ];
        let order = topo_order(&nodes).unwrap();
        let names: Vec<&str> = order.iter().map(|&i| nodes[i].name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_topo_order_is_declared_order_stable() {
        // Independent nodes keep their declared order
        let nodes = vec![
            node("z", &[], true),
            node("a", &[], true),
            node("m", &[], true),
        ];
        let order = topo_order(&nodes).unwrap();
        let names: Vec<&str> = order.iter().map(|&i| nodes[i].name.as_str()).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_topo_order_ignores_unknown_dependencies() {
        let nodes = vec![node("a", &["ghost"], true), node("b", &["a"], true)];
        let order = topo_order(&nodes).unwrap();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn test_cycle_is_detected() {
        let nodes = vec![node("a", &["b"], true), node("b", &["a"], true)];
        assert!(matches!(
            topo_order(&nodes),
            Err(SchedulerError::CycleDetected(_))
        ));
    }

    #[test]
    fn test_self_cycle_is_detected() {
        let nodes = vec![node("a", &["a"], true)];
        assert!(matches!(
            topo_order(&nodes),
            Err(SchedulerError::CycleDetected(_))
        ));
    }

    #[tokio::test]
    async fn test_cycle_executes_nothing() {
        let nodes = vec![node("a", &["b"], true), node("b", &["a"], true)];
        let executor = ScriptedExecutor::new(&nodes, &[]);
        let result = run_schedule(&nodes, &executor, 8).await;
        assert!(result.is_err());
        assert!(executor.executed().is_empty());
    }

    #[tokio::test]
    async fn test_linear_chain_executes_in_order() {
        let nodes = vec![
            node("a", &[], true),
            node("b", &["a"], true),
            node("c", &["b"], true),
        ];
        let executor = ScriptedExecutor::new(
            &nodes,
            &[
                ("a", DeploymentState::Deployed),
                ("b", DeploymentState::Deployed),
                ("c", DeploymentState::Deployed),
            ],
        );
        let outcomes = run_schedule(&nodes, &executor, 8).await.unwrap();

        assert_eq!(executor.executed(), vec!["a", "b", "c"]);
        assert!(outcomes
            .values()
            .all(|o| o.state == DeploymentState::Deployed));
    }

    #[tokio::test]
    async fn test_waiting_dependency_holds_dependent_back() {
        // A applied but not yet ready; B (dependsOn A, A.wait=true) must
        // not be applied this pass
        let nodes = vec![node("a", &[], true), node("b", &["a"], true)];
        let executor = ScriptedExecutor::new(&nodes, &[("a", DeploymentState::Deploying)]);
        let outcomes = run_schedule(&nodes, &executor, 8).await.unwrap();

        assert_eq!(executor.executed(), vec!["a"]);
        assert_eq!(outcomes.get("b").unwrap().state, DeploymentState::Pending);
    }

    #[tokio::test]
    async fn test_no_wait_dependency_releases_dependent_once_applied() {
        // A.wait=false: B becomes ready as soon as A has been applied
        let nodes = vec![node("a", &[], false), node("b", &["a"], true)];
        let executor = ScriptedExecutor::new(
            &nodes,
            &[
                ("a", DeploymentState::Deploying),
                ("b", DeploymentState::Deployed),
            ],
        );
        let outcomes = run_schedule(&nodes, &executor, 8).await.unwrap();

        assert_eq!(executor.executed(), vec!["a", "b"]);
        assert_eq!(outcomes.get("b").unwrap().state, DeploymentState::Deployed);
    }

    #[tokio::test]
    async fn test_failed_node_blocks_transitive_dependents() {
        let nodes = vec![
            node("a", &[], true),
            node("b", &["a"], true),
            node("c", &["b"], true),
        ];
        let executor = ScriptedExecutor::new(&nodes, &[("a", DeploymentState::Failed)]);
        let outcomes = run_schedule(&nodes, &executor, 8).await.unwrap();

        assert_eq!(executor.executed(), vec!["a"]);
        assert_eq!(outcomes.get("b").unwrap().state, DeploymentState::Blocked);
        assert_eq!(outcomes.get("c").unwrap().state, DeploymentState::Blocked);
    }

    #[tokio::test]
    async fn test_independent_branch_proceeds_despite_failure() {
        // a fails, but x/y on the independent branch still run
        let nodes = vec![
            node("a", &[], true),
            node("b", &["a"], true),
            node("x", &[], true),
            node("y", &["x"], true),
        ];
        let executor = ScriptedExecutor::new(
            &nodes,
            &[
                ("a", DeploymentState::Failed),
                ("x", DeploymentState::Deployed),
                ("y", DeploymentState::Deployed),
            ],
        );
        let outcomes = run_schedule(&nodes, &executor, 8).await.unwrap();

        assert!(executor.executed().contains(&"y".to_string()));
        assert_eq!(outcomes.get("b").unwrap().state, DeploymentState::Blocked);
        assert_eq!(outcomes.get("y").unwrap().state, DeploymentState::Deployed);
    }

    #[tokio::test]
    async fn test_diamond_executes_join_after_both_branches() {
        let nodes = vec![
            node("a", &[], true),
            node("b", &["a"], true),
            node("c", &["a"], true),
            node("d", &["b", "c"], true),
        ];
        let executor = ScriptedExecutor::new(&nodes, &[]);
        run_schedule(&nodes, &executor, 8).await.unwrap();

        let executed = executor.executed();
        assert_eq!(executed[0], "a");
        assert_eq!(executed[3], "d");
    }

    #[test]
    fn test_aggregate_phase_failed_wins() {
        let outcomes = BTreeMap::from([
            (
                "a".to_string(),
                NodeOutcome {
                    state: DeploymentState::Deployed,
                    message: None,
                },
            ),
            (
                "b".to_string(),
                NodeOutcome {
                    state: DeploymentState::Blocked,
                    message: None,
                },
            ),
        ]);
        assert_eq!(aggregate_phase(&outcomes), DeploymentPhase::Failed);
    }

    #[test]
    fn test_aggregate_phase_deployed_when_all_deployed() {
        let outcomes = BTreeMap::from([(
            "a".to_string(),
            NodeOutcome {
                state: DeploymentState::Deployed,
                message: None,
            },
        )]);
        assert_eq!(aggregate_phase(&outcomes), DeploymentPhase::Deployed);
    }

    #[test]
    fn test_aggregate_phase_deploying_otherwise() {
        let outcomes = BTreeMap::from([
            (
                "a".to_string(),
                NodeOutcome {
                    state: DeploymentState::Deployed,
                    message: None,
                },
            ),
            (
                "b".to_string(),
                NodeOutcome {
                    state: DeploymentState::Deploying,
                    message: None,
                },
            ),
        ]);
        assert_eq!(aggregate_phase(&outcomes), DeploymentPhase::Deploying);
    }
}
