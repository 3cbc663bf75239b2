// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across all reconcilers.
//!
//! This module defines standard Kubernetes labels and Herd-specific labels/annotations
//! to ensure consistency across all resources created by the controller.

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of a higher-level application this one is part of
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

/// Value for `app.kubernetes.io/part-of` indicating this resource is part of Herd
pub const PART_OF_HERD: &str = "herd";

/// Value for `app.kubernetes.io/managed-by` on resources created by this controller
pub const MANAGED_BY_HERD: &str = "herd-controller";

// ============================================================================
// Herd-Specific Owner Labels
// ============================================================================

/// Label carrying the kind of the parent resource (`stack` or `pipeline`)
pub const HERD_OWNER_KIND_LABEL: &str = "herd.suse.com/owner-kind";

/// Label carrying the name of the parent resource
pub const HERD_OWNER_NAME_LABEL: &str = "herd.suse.com/owner-name";

/// Label carrying the namespace of the parent resource
pub const HERD_OWNER_NAMESPACE_LABEL: &str = "herd.suse.com/owner-namespace";

/// Label carrying the chart name a Bundle was synthesized from
pub const HERD_CHART_LABEL: &str = "herd.suse.com/chart";

// ============================================================================
// Herd-Specific Annotations
// ============================================================================

/// Annotation holding the SHA-256 content hash of the desired Bundle spec
pub const HERD_CONTENT_HASH_ANNOTATION: &str = "herd.suse.com/content-hash";

/// Annotation holding the RFC3339 timestamp of the Bundle's first apply.
/// Deployment timeouts are measured from this anchor.
pub const HERD_FIRST_APPLIED_ANNOTATION: &str = "herd.suse.com/first-applied-at";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer for `Stack` and `Pipeline` resources
pub const HERD_FINALIZER: &str = "herd.suse.com/finalizer";
