// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Global constants for the Herd operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all Herd CRDs
pub const API_GROUP: &str = "herd.suse.com";

/// API version for all Herd CRDs
pub const API_VERSION: &str = "v1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "herd.suse.com/v1";

/// Kind name for `Stack` resource
pub const KIND_STACK: &str = "Stack";

/// Kind name for `Pipeline` resource
pub const KIND_PIPELINE: &str = "Pipeline";

// ============================================================================
// Fleet Constants
// ============================================================================

/// Fleet API group
pub const FLEET_API_GROUP: &str = "fleet.cattle.io";

/// Fleet API version
pub const FLEET_API_VERSION: &str = "v1alpha1";

/// Fleet workspace namespace for downstream clusters
pub const WORKSPACE_DEFAULT: &str = "fleet-default";

/// Fleet workspace namespace for the management cluster
pub const WORKSPACE_LOCAL: &str = "fleet-local";

/// Cluster id of the Rancher management cluster
pub const MANAGEMENT_CLUSTER_ID: &str = "local";

/// Cluster state reported by Rancher for usable clusters
pub const CLUSTER_STATE_ACTIVE: &str = "active";

/// Maximum length of a Bundle name (Kubernetes DNS-1123 label limit)
pub const BUNDLE_NAME_MAX_LEN: usize = 63;

// ============================================================================
// Controller Defaults
// ============================================================================

/// Default number of reconcile workers (`WORKER_COUNT`)
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default periodic resync interval in seconds (`RESYNC_INTERVAL`)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 600;

/// Default bound on concurrent Bundle applies within one reconciliation
pub const DEFAULT_APPLY_CONCURRENCY: usize = 8;

/// Default chart/step deployment timeout (10 minutes)
pub const DEFAULT_CHART_TIMEOUT_SECS: u64 = 600;

/// Default retry budget for Pipeline steps
pub const DEFAULT_STEP_RETRIES: u32 = 3;

/// Requeue interval while a resource is still deploying (30 seconds)
pub const REQUEUE_WHEN_NOT_READY_SECS: u64 = 30;

/// Base delay for the error-requeue backoff (1 second)
pub const ERROR_BACKOFF_BASE_SECS: u64 = 1;

/// Cap for the error-requeue backoff (5 minutes)
pub const ERROR_BACKOFF_MAX_SECS: u64 = 300;

/// Maximum attempts for conflict-retrying status writes
pub const STATUS_UPDATE_MAX_ATTEMPTS: u32 = 5;

// ============================================================================
// Rancher API Defaults
// ============================================================================

/// Default request timeout for the Rancher management API in seconds (`RANCHER_TIMEOUT`)
pub const DEFAULT_RANCHER_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// HTTP Server Constants
// ============================================================================

/// Port for the health/metrics HTTP server
pub const HTTP_SERVER_PORT: u16 = 8080;

/// Path for the health endpoint
pub const HEALTH_PATH: &str = "/healthz";

/// Path for the Prometheus metrics endpoint
pub const METRICS_PATH: &str = "/metrics";

/// Bind address for the HTTP server
pub const HTTP_SERVER_BIND_ADDRESS: &str = "0.0.0.0";

// ============================================================================
// Leader Election Constants
// ============================================================================

/// Default leader election lease duration (15 seconds)
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 15;

/// Default leader election retry period (2 seconds)
pub const DEFAULT_LEASE_RETRY_PERIOD_SECS: u64 = 2;

// ============================================================================
// Step Chart Defaults
// ============================================================================

/// Default Helm repository for pipeline step charts
pub const DEFAULT_STEP_CHART_REPO: &str = "https://charts.herd.suse.com";

/// Default chart version for pipeline step charts when the config omits one
pub const DEFAULT_STEP_CHART_VERSION: &str = "latest";
