// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # Herd - Multi-Cluster AI/ML Stack Controller for Kubernetes
//!
//! Herd is a Kubernetes controller written in Rust that deploys AI/ML
//! workloads, described as sets of Helm charts, across Rancher-managed
//! clusters via Fleet.
//!
//! ## Overview
//!
//! This library provides the core functionality for the Herd controller:
//!
//! - Custom Resource Definitions for [`crd::Stack`] and [`crd::Pipeline`]
//! - Cluster-target resolution against Rancher's inventory
//! - A precedence-ordered values merge (ConfigMaps, env overlay,
//!   per-cluster overrides, Secrets, inline)
//! - Dependency scheduling with `dependsOn`, `wait`, and timeouts
//! - Deterministic Fleet Bundle synthesis with idempotent apply
//! - Status aggregation with phases and conditions
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`reconcilers`] - Reconciliation logic for each resource type
//! - [`rancher`] - Rancher management API client (cluster discovery)
//! - [`fleet`] - Fleet Bundle types and the bundle API façade
//!
//! ## Example
//!
//! ```rust,no_run
//! use herd::crd::{Environment, StackSpec, TargetSelector, TargetSpec};
//! use std::collections::BTreeMap;
//!
//! let spec = StackSpec {
//!     env: Environment::Prod,
//!     security: true,
//!     observability: false,
//!     targets: TargetSpec {
//!         cluster_ids: None,
//!         selector: Some(TargetSelector {
//!             match_labels: BTreeMap::from([("gpu".to_string(), "true".to_string())]),
//!         }),
//!     },
//!     charts: vec![],
//! };
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod duration;
pub mod events;
pub mod fleet;
pub mod health;
pub mod labels;
pub mod metrics;
pub mod rancher;
pub mod reconcilers;
pub mod selector;
pub mod status_reasons;
