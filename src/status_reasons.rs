// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Condition reason constants shared by the Stack and Pipeline reconcilers.
//!
//! Reasons are machine-readable CamelCase identifiers surfaced on status
//! conditions and Kubernetes events.

/// Condition type for overall readiness
pub const CONDITION_TYPE_READY: &str = "Ready";

/// Condition type set when security scanning has been requested
pub const CONDITION_TYPE_SECURITY_SCANNED: &str = "SecurityScanned";

/// Condition type set when observability wiring has been requested
pub const CONDITION_TYPE_OBSERVABILITY_CONFIGURED: &str = "ObservabilityConfigured";

/// All deployments reached `Deployed`
pub const REASON_DEPLOYMENT_SUCCEEDED: &str = "DeploymentSucceeded";

/// Deployments are still progressing
pub const REASON_DEPLOYMENT_IN_PROGRESS: &str = "DeploymentInProgress";

/// One or more deployments failed or were blocked
pub const REASON_DEPLOYMENT_FAILED: &str = "DeploymentFailed";

/// The `dependsOn` graph contains a cycle
pub const REASON_CYCLE_DETECTED: &str = "CycleDetected";

/// Target resolution produced zero usable clusters
pub const REASON_NO_TARGETS: &str = "NoTargets";

/// A selector with no matchLabels was supplied
pub const REASON_EMPTY_SELECTOR: &str = "EmptySelector";

/// The spec failed admission-level validation
pub const REASON_VALIDATION_FAILED: &str = "ValidationFailed";

/// A referenced ConfigMap or Secret does not exist
pub const REASON_MISSING_VALUE_SOURCE: &str = "MissingValueSource";

/// A values payload could not be parsed
pub const REASON_PARSE_FAILURE: &str = "ParseFailure";

/// A chart's `wait` timeout expired before its Bundle became ready
pub const REASON_TIMEOUT_EXPIRED: &str = "TimeoutExpired";

/// Security scan marker emitted
pub const REASON_SCAN_REQUESTED: &str = "ScanRequested";

/// Observability marker emitted
pub const REASON_OBSERVABILITY_REQUESTED: &str = "ObservabilityRequested";
