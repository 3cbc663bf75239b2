// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Shared context for the Stack and Pipeline controllers.
//!
//! All reconcilers receive an `Arc<Context>` carrying:
//! - the Kubernetes client
//! - the injected Rancher inventory and Fleet bundle façades
//! - the event publisher
//! - health state and tuning knobs
//!
//! The façades are traits so tests can run the full reconciliation
//! pipeline against in-memory fakes.

use crate::config::ControllerConfig;
use crate::constants::{ERROR_BACKOFF_BASE_SECS, ERROR_BACKOFF_MAX_SECS};
use crate::events::EventPublisher;
use crate::fleet::BundleApi;
use crate::health::HealthState;
use crate::rancher::ClusterInventory;
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared context passed to all controllers.
pub struct Context {
    /// Kubernetes client for API operations
    pub client: Client,

    /// Rancher cluster inventory (read-only discovery)
    pub inventory: Arc<dyn ClusterInventory>,

    /// Fleet Bundle CRUD façade
    pub bundles: Arc<dyn BundleApi>,

    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,

    /// Health state behind `/healthz`
    pub health: Arc<HealthState>,

    /// Controller tuning knobs
    pub config: ControllerConfig,

    /// Consecutive error counts per object key, for requeue backoff
    error_counts: Mutex<HashMap<String, u32>>,
}

impl Context {
    /// Assemble a context from its parts.
    #[must_use]
    pub fn new(
        client: Client,
        inventory: Arc<dyn ClusterInventory>,
        bundles: Arc<dyn BundleApi>,
        events: Arc<dyn EventPublisher>,
        health: Arc<HealthState>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            client,
            inventory,
            bundles,
            events,
            health,
            config,
            error_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Record a reconciliation error for `key` and return the requeue delay.
    ///
    /// Delays grow exponentially from 1 second and cap at 5 minutes.
    pub fn error_backoff(&self, key: &str) -> Duration {
        let mut counts = self.error_counts.lock().expect("error count lock poisoned");
        let attempt = counts.entry(key.to_string()).or_insert(0);
        *attempt = attempt.saturating_add(1);
        backoff_delay(*attempt)
    }

    /// Clear the error count for `key` after a successful reconciliation.
    pub fn reset_error_backoff(&self, key: &str) {
        let mut counts = self.error_counts.lock().expect("error count lock poisoned");
        counts.remove(key);
    }
}

/// Requeue delay for the nth consecutive error on one key: exponential
/// from the 1-second base, capped at 5 minutes.
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let secs = ERROR_BACKOFF_BASE_SECS
        .saturating_mul(1u64 << exp)
        .min(ERROR_BACKOFF_MAX_SECS);
    Duration::from_secs(secs)
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
