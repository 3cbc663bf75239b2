// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Dependency scheduling for charts and pipeline steps.
//!
//! Charts/steps form a DAG via `dependsOn`. Within one reconciliation the
//! scheduler is single-threaded cooperative: it validates the graph,
//! computes a declared-order-stable topological ordering, then executes
//! *waves* of currently-ready nodes. Applies within a wave are issued in
//! declared order and run concurrently, bounded by the per-parent
//! concurrency limit; the heavy lifting happens in the Fleet agents.
//!
//! A node becomes ready when every predecessor reached `Deployed` (or, for
//! predecessors with `wait: false`, at least `Deploying`). A `Failed` node
//! marks all transitive dependents `Blocked`, and the scheduler still runs
//! to completion so partial status is reported.
//!
//! Cycle detection happens before anything is applied: on a cycle, nothing
//! is written and the resource fails with reason `CycleDetected`.

use crate::crd::DeploymentState;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// One schedulable unit: a chart or a lowered pipeline step.
#[derive(Clone, Debug)]
pub struct DagNode {
    /// Unique name within the parent resource
    pub name: String,
    /// Names of predecessor nodes
    pub depends_on: Vec<String>,
    /// Dependents wait for Ready (true) or merely Applied (false)
    pub wait: bool,
    /// Deadline measured from first apply
    pub timeout: Duration,
}

/// Scheduling failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The dependency graph contains a cycle; nothing was applied
    #[error("dependency cycle detected involving '{0}'")]
    CycleDetected(String),
}

/// Result of executing one node in a wave.
#[derive(Clone, Debug)]
pub struct NodeOutcome {
    /// State the node reached this reconciliation
    pub state: DeploymentState,
    /// Human-readable detail for status and events
    pub message: Option<String>,
}

/// Executes a single ready node: merge values, apply Bundles, observe.
///
/// Implementations must be idempotent; a node whose Bundles already match
/// the desired content reports its observed state without writing.
#[async_trait]
pub trait NodeExecutor: Sync {
    /// Execute the node at `index` in the node slice.
    async fn execute(&self, index: usize) -> NodeOutcome;
}

/// Compute a topological ordering of `nodes`, stable with respect to
/// declared order among simultaneously-ready nodes.
///
/// Dependencies naming unknown nodes are ignored with a warning, matching
/// the tolerance of the rest of the pipeline.
///
/// # Errors
///
/// Returns [`SchedulerError::CycleDetected`] naming a node on the cycle.
pub fn topo_order(nodes: &[DagNode]) -> Result<Vec<usize>, SchedulerError> {
    let index_by_name: BTreeMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.name.as_str(), i))
        .collect();

    // Effective in-degree counting only known dependencies
    let mut indegree = vec![0usize; nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        for dep in &node.depends_on {
            if index_by_name.contains_key(dep.as_str()) {
                indegree[i] += 1;
            } else {
                warn!(node = %node.name, dependency = %dep, "Unknown dependency, ignoring");
            }
        }
    }

    let mut emitted = vec![false; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());

    while order.len() < nodes.len() {
        // First unemitted node with no remaining predecessors, in declared order
        let Some(next) = (0..nodes.len()).find(|&i| !emitted[i] && indegree[i] == 0) else {
            // Every remaining node has a predecessor: there is a cycle
            let stuck = (0..nodes.len())
                .find(|&i| !emitted[i])
                .map(|i| nodes[i].name.clone())
                .unwrap_or_default();
            return Err(SchedulerError::CycleDetected(stuck));
        };

        emitted[next] = true;
        order.push(next);

        let next_name = nodes[next].name.as_str();
        for (i, node) in nodes.iter().enumerate() {
            if !emitted[i] && node.depends_on.iter().any(|d| d == next_name) {
                indegree[i] -= 1;
            }
        }
    }

    Ok(order)
}

/// How a node's dependencies currently stand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DepCheck {
    /// All predecessors satisfied; the node may execute
    Satisfied,
    /// At least one predecessor is still in flight
    Waiting,
    /// At least one predecessor failed or was blocked
    Blocked,
}

fn check_dependencies(
    node: &DagNode,
    nodes_by_name: &BTreeMap<&str, &DagNode>,
    states: &BTreeMap<String, DeploymentState>,
) -> DepCheck {
    let mut check = DepCheck::Satisfied;
    for dep_name in &node.depends_on {
        let Some(dep) = nodes_by_name.get(dep_name.as_str()) else {
            continue; // unknown deps were already warned about
        };
        let state = states
            .get(dep_name)
            .copied()
            .unwrap_or(DeploymentState::Pending);
        match state {
            DeploymentState::Failed | DeploymentState::Blocked => return DepCheck::Blocked,
            DeploymentState::Deployed => {}
            // wait: false dependencies only need to be applied
            DeploymentState::Deploying if !dep.wait => {}
            _ => check = DepCheck::Waiting,
        }
    }
    check
}

/// Run the schedule to completion for this reconciliation.
///
/// Executes waves of ready nodes until no node can make progress, then
/// propagates `Blocked` to the transitive dependents of failures. Nodes
/// whose predecessors are still deploying remain `Pending` and are picked
/// up by a later reconciliation.
///
/// # Errors
///
/// Returns [`SchedulerError::CycleDetected`] before executing anything if
/// the graph is cyclic.
pub async fn run_schedule(
    nodes: &[DagNode],
    executor: &dyn NodeExecutor,
    concurrency: usize,
) -> Result<BTreeMap<String, NodeOutcome>, SchedulerError> {
    let order = topo_order(nodes)?;

    let nodes_by_name: BTreeMap<&str, &DagNode> =
        nodes.iter().map(|n| (n.name.as_str(), n)).collect();

    let mut outcomes: BTreeMap<String, NodeOutcome> = BTreeMap::new();
    let mut states: BTreeMap<String, DeploymentState> = nodes
        .iter()
        .map(|n| (n.name.clone(), DeploymentState::Pending))
        .collect();
    let mut executed: BTreeSet<usize> = BTreeSet::new();

    loop {
        // Ready wave: unexecuted nodes whose dependencies are satisfied,
        // in topological (declared-order-stable) order
        let wave: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&i| {
                !executed.contains(&i)
                    && check_dependencies(&nodes[i], &nodes_by_name, &states)
                        == DepCheck::Satisfied
            })
            .collect();

        if wave.is_empty() {
            break;
        }

        debug!(
            wave = ?wave.iter().map(|&i| nodes[i].name.as_str()).collect::<Vec<_>>(),
            "Executing scheduler wave"
        );

        let results: Vec<(usize, NodeOutcome)> = futures::stream::iter(wave)
            .map(|i| async move { (i, executor.execute(i).await) })
            .buffered(concurrency.max(1))
            .collect()
            .await;

        for (i, outcome) in results {
            executed.insert(i);
            states.insert(nodes[i].name.clone(), outcome.state);
            outcomes.insert(nodes[i].name.clone(), outcome);
        }
    }

    // Failure propagation: transitive dependents of failed/blocked nodes
    // become Blocked (distinct from Failed: they were never tried)
    for &i in &order {
        let node = &nodes[i];
        if executed.contains(&i) {
            continue;
        }
        if check_dependencies(node, &nodes_by_name, &states) == DepCheck::Blocked {
            states.insert(node.name.clone(), DeploymentState::Blocked);
            outcomes.insert(
                node.name.clone(),
                NodeOutcome {
                    state: DeploymentState::Blocked,
                    message: Some("blocked by failed dependency".to_string()),
                },
            );
        } else {
            outcomes.insert(
                node.name.clone(),
                NodeOutcome {
                    state: DeploymentState::Pending,
                    message: Some("waiting for dependencies".to_string()),
                },
            );
        }
    }

    Ok(outcomes)
}

/// Roll node states up into an overall phase.
///
/// `Failed` if any node is `Failed` or `Blocked`; `Deployed` if all nodes
/// are `Deployed`; `Deploying` otherwise.
#[must_use]
pub fn aggregate_phase(
    outcomes: &BTreeMap<String, NodeOutcome>,
) -> crate::crd::DeploymentPhase {
    use crate::crd::DeploymentPhase;

    let any_failed = outcomes
        .values()
        .any(|o| matches!(o.state, DeploymentState::Failed | DeploymentState::Blocked));
    if any_failed {
        return DeploymentPhase::Failed;
    }

    let all_deployed = outcomes
        .values()
        .all(|o| o.state == DeploymentState::Deployed);
    if all_deployed {
        DeploymentPhase::Deployed
    } else {
        DeploymentPhase::Deploying
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod scheduler_tests;
