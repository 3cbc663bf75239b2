// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Rancher management API client for cluster discovery.
//!
//! The controller discovers downstream clusters through Rancher's
//! `management.cattle.io/v3` REST API. Only read access is needed: the
//! resolver consumes `{id, name, labels, state}` per cluster and excludes
//! anything that is not `active`.
//!
//! The client is constructed once at startup from [`RancherConfig`] and
//! injected into the reconcilers behind the [`ClusterInventory`] trait so
//! tests can substitute a fake inventory. Transient failures retry under
//! the shared backoff engine; 4xx responses surface immediately.

use crate::config::RancherConfig;
use crate::reconcilers::retry::{
    transient_http_status, with_backoff, BackoffPolicy, ErrorClass, Retryable,
};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// A cluster as reported by the Rancher management API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterInfo {
    /// Rancher cluster id (e.g. `c-m-abc123`, or `local` for the management cluster)
    pub id: String,
    /// Display name
    pub name: String,
    /// Cluster labels
    pub labels: BTreeMap<String, String>,
    /// Lifecycle state (`active`, `provisioning`, ...)
    pub state: String,
}

/// Cluster discovery failures.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Network error or 5xx after retries; the reconciliation should requeue
    #[error("transient cluster list failure: {0}")]
    Transient(String),

    /// 4xx response; retrying will not help
    #[error("cluster list rejected by Rancher: {0}")]
    Permanent(String),
}

impl Retryable for InventoryError {
    fn error_class(&self) -> ErrorClass {
        match self {
            InventoryError::Transient(_) => ErrorClass::Transient,
            InventoryError::Permanent(_) => ErrorClass::Permanent,
        }
    }
}

/// Read-only source of downstream cluster inventory.
#[async_trait]
pub trait ClusterInventory: Send + Sync {
    /// List all clusters known to Rancher, regardless of state.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Transient`] for network failures and 5xx
    /// responses (after retries), [`InventoryError::Permanent`] for 4xx.
    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, InventoryError>;
}

/// Wire shape of Rancher's cluster collection response.
#[derive(Debug, Deserialize)]
struct ClusterCollection {
    #[serde(default)]
    data: Vec<ClusterItem>,
}

#[derive(Debug, Deserialize)]
struct ClusterItem {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    state: Option<String>,
}

/// Production [`ClusterInventory`] backed by the Rancher v3 REST API.
pub struct RancherClient {
    http: reqwest::Client,
    base_url: String,
}

impl RancherClient {
    /// Build a client from connection settings.
    ///
    /// Normalizes the base URL so that it ends in `/v3` regardless of how
    /// the operator supplied `RANCHER_URL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed
    /// (invalid token bytes, TLS backend failure).
    pub fn new(config: &RancherConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth =
            reqwest::header::HeaderValue::from_str(&format!("Bearer {}", config.token))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()?;

        Ok(Self {
            http,
            base_url: normalize_base_url(&config.url),
        })
    }

    /// The `/v3` API root derived from the configured URL, for logging and
    /// diagnostics.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_clusters_once(&self) -> Result<ClusterCollection, InventoryError> {
        let url = format!("{}/clusters", self.base_url);
        debug!(url = %url, "Fetching clusters from Rancher");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| InventoryError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<ClusterCollection>()
                .await
                .map_err(|e| InventoryError::Transient(format!("invalid JSON response: {e}")))
        } else if transient_http_status(status) {
            Err(InventoryError::Transient(format!(
                "Rancher returned {status}"
            )))
        } else {
            Err(InventoryError::Permanent(format!(
                "Rancher returned {status}"
            )))
        }
    }
}

#[async_trait]
impl ClusterInventory for RancherClient {
    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, InventoryError> {
        let collection = with_backoff(&BackoffPolicy::rancher_http(), "list rancher clusters", || {
            self.fetch_clusters_once()
        })
        .await?;

        let clusters = collection
            .data
            .into_iter()
            .map(|item| ClusterInfo {
                name: item.name.unwrap_or_else(|| item.id.clone()),
                id: item.id,
                labels: item.labels,
                state: item.state.unwrap_or_default(),
            })
            .collect::<Vec<_>>();

        debug!(count = clusters.len(), "Listed clusters from Rancher");
        Ok(clusters)
    }
}

/// Normalize an operator-supplied Rancher URL so it ends in `/v3`.
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with("/v3") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v3")
    }
}

#[cfg(test)]
#[path = "rancher_tests.rs"]
mod rancher_tests;
