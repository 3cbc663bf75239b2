// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Label selector matching utilities.
//!
//! Cluster targeting uses the `matchLabels` subset of Kubernetes label
//! selector semantics: a cluster matches when its label set is a superset
//! of the selector's `matchLabels`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use herd::crd::TargetSelector;
//! use herd::selector::matches_labels;
//!
//! # fn example() {
//! let mut labels = BTreeMap::new();
//! labels.insert("env".to_string(), "prod".to_string());
//! labels.insert("gpu".to_string(), "true".to_string());
//!
//! let mut match_labels = BTreeMap::new();
//! match_labels.insert("env".to_string(), "prod".to_string());
//!
//! let selector = TargetSelector { match_labels };
//! assert!(matches_labels(&selector, &labels));
//! # }
//! ```

use crate::crd::TargetSelector;
use std::collections::BTreeMap;

/// Check if a set of cluster labels satisfies a target selector.
///
/// All `matchLabels` entries must be present with exact values. An empty
/// selector matches everything; callers reject empty selectors before
/// resolution (`EmptySelector` is a permanent failure).
///
/// # Arguments
/// * `selector` - The target selector to evaluate
/// * `labels` - The cluster labels to match against
///
/// # Returns
/// `true` if the labels match the selector, `false` otherwise
#[must_use]
pub fn matches_labels(selector: &TargetSelector, labels: &BTreeMap<String, String>) -> bool {
    selector
        .match_labels
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod selector_tests;
