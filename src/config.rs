// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Process-environment configuration for the controller.
//!
//! All configuration is read once at startup. Components receive their
//! settings by value; nothing re-reads the environment after boot.

use crate::constants::{
    DEFAULT_APPLY_CONCURRENCY, DEFAULT_RANCHER_TIMEOUT_SECS, DEFAULT_RESYNC_INTERVAL_SECS,
    DEFAULT_WORKER_COUNT,
};
use anyhow::{Context, Result};
use std::time::Duration;

/// Connection settings for the Rancher management API.
#[derive(Clone, Debug)]
pub struct RancherConfig {
    /// Base URL of the Rancher server (e.g. `https://rancher.example.com`)
    pub url: String,
    /// Bearer token for API authentication
    pub token: String,
    /// Verify the server TLS certificate
    pub verify_ssl: bool,
    /// Per-request timeout
    pub timeout: Duration,
}

impl RancherConfig {
    /// Load Rancher connection settings from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `RANCHER_URL` or `RANCHER_TOKEN` is unset.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("RANCHER_URL")
            .context("RANCHER_URL environment variable is required")?;
        let token = std::env::var("RANCHER_TOKEN")
            .context("RANCHER_TOKEN environment variable is required")?;

        let verify_ssl = std::env::var("RANCHER_VERIFY_SSL")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let timeout = std::env::var("RANCHER_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map_or(
                Duration::from_secs(DEFAULT_RANCHER_TIMEOUT_SECS),
                Duration::from_secs,
            );

        Ok(Self {
            url,
            token,
            verify_ssl,
            timeout,
        })
    }
}

/// Controller-level tuning knobs.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Number of Tokio worker threads draining the reconcile queues
    pub worker_count: usize,
    /// Periodic resync interval for settled resources
    pub resync_interval: Duration,
    /// Bound on concurrent Bundle applies within one reconciliation
    pub apply_concurrency: usize,
}

impl ControllerConfig {
    /// Load controller tuning from the environment, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let worker_count = std::env::var("WORKER_COUNT")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_WORKER_COUNT);

        let resync_interval = std::env::var("RESYNC_INTERVAL")
            .ok()
            .and_then(|s| crate::duration::parse_timeout(&s))
            .unwrap_or(Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECS));

        let apply_concurrency = std::env::var("APPLY_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_APPLY_CONCURRENCY);

        Self {
            worker_count,
            resync_interval,
            apply_concurrency,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECS),
            apply_concurrency: DEFAULT_APPLY_CONCURRENCY,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
