// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Values-merge pipeline for Helm charts.
//!
//! Values for one (chart, cluster) pair are deep-merged from up to five
//! sources, lowest to highest precedence:
//!
//! 1. `values.configMapRefs` in declared order
//! 2. The environment overlay ConfigMap (`herd-env-{env}` and fallbacks)
//! 3. `values.perClusterConfigMapRef`, key `{clusterId}.yaml`
//! 4. `values.secretRefs` in declared order
//! 5. `values.inline`
//!
//! Nested mappings merge key-by-key; sequences are replaced, not
//! concatenated; scalars overwrite. The feature toggles are injected
//! *after* the merge so user values cannot suppress them.
//!
//! Secret payloads are parsed identically to ConfigMap payloads and never
//! appear in logs, events, or status.

use crate::crd::{ChartValues, Environment, ValuesSourceRef};
use crate::reconcilers::retry::retry_kube;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Final mapping of Helm values for one chart on one cluster.
pub type RenderedValues = BTreeMap<String, Value>;

/// Values-merge failures. Both are permanent for the affected chart: its
/// deployments are marked `Failed` and dependents become `Blocked`.
#[derive(Debug, Error)]
pub enum ValuesError {
    /// A named ConfigMap or Secret does not exist
    #[error("{kind} {namespace}/{name} not found")]
    MissingSource {
        /// `ConfigMap` or `Secret`
        kind: &'static str,
        name: String,
        namespace: String,
    },

    /// A payload could not be parsed as a YAML mapping
    #[error("invalid values payload in {kind} {namespace}/{name}: {detail}")]
    ParseFailure {
        /// `ConfigMap` or `Secret`
        kind: &'static str,
        name: String,
        namespace: String,
        detail: String,
    },

    /// The Kubernetes API failed after retries
    #[error(transparent)]
    Api(#[from] anyhow::Error),
}

/// Merge values from all sources in precedence order.
///
/// The result is a pure function of the chart's values spec, the
/// environment, the cluster id, and the ConfigMap/Secret contents fetched
/// at reconcile time.
///
/// # Errors
///
/// Returns [`ValuesError::MissingSource`] or [`ValuesError::ParseFailure`]
/// (permanent for this chart), or [`ValuesError::Api`] on exhausted API
/// retries (transient).
pub async fn merge_chart_values(
    client: &Client,
    values: Option<&ChartValues>,
    env: Environment,
    cluster_id: &str,
    default_namespace: &str,
) -> Result<RenderedValues, ValuesError> {
    let mut merged = RenderedValues::new();

    // 1. Base values from ConfigMap references
    if let Some(values) = values {
        for config_ref in &values.config_map_refs {
            let payload = load_from_configmap(client, config_ref, default_namespace).await?;
            if let Some(payload) = payload {
                deep_merge(&mut merged, payload);
                debug!(configmap = %config_ref.name, "Merged values from ConfigMap");
            }
        }
    }

    // 2. Environment overlay
    if let Some(overlay) = load_env_overlay(client, env, default_namespace).await? {
        deep_merge(&mut merged, overlay);
        debug!(env = %env, "Merged environment overlay");
    }

    if let Some(values) = values {
        // 3. Per-cluster overrides
        if let Some(per_cluster) = &values.per_cluster_config_map_ref {
            if let Some(payload) =
                load_cluster_override(client, per_cluster, cluster_id, default_namespace).await?
            {
                deep_merge(&mut merged, payload);
                debug!(cluster_id = %cluster_id, "Merged cluster override");
            }
        }

        // 4. Secret references
        for secret_ref in &values.secret_refs {
            let payload = load_from_secret(client, secret_ref, default_namespace).await?;
            if let Some(payload) = payload {
                deep_merge(&mut merged, payload);
                debug!(secret = %secret_ref.name, "Merged values from Secret");
            }
        }

        // 5. Inline values, highest precedence
        if let Some(inline) = &values.inline {
            deep_merge(&mut merged, inline.clone());
            debug!("Merged inline values");
        }
    }

    Ok(merged)
}

/// Inject the reserved feature-toggle keys into merged values.
///
/// Runs after the merge so user values cannot suppress the toggles. The
/// keys land at `herd.security.enabled` and `herd.observability.enabled`;
/// a user-supplied non-mapping `herd` key is replaced.
pub fn inject_feature_toggles(values: &mut RenderedValues, security: bool, observability: bool) {
    let herd = values
        .entry("herd".to_string())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if !herd.is_object() {
        *herd = Value::Object(serde_json::Map::new());
    }
    let herd = herd.as_object_mut().expect("herd key coerced to object");

    for (key, enabled) in [("security", security), ("observability", observability)] {
        let entry = herd
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(serde_json::Map::new());
        }
        entry
            .as_object_mut()
            .expect("toggle key coerced to object")
            .insert("enabled".to_string(), Value::Bool(enabled));
    }
}

/// Deep-merge `overlay` into `base`.
///
/// Mappings merge on matching keys; sequences are replaced, not
/// concatenated; scalars overwrite. Replacement (not concatenation) of
/// sequences matches user expectation for Helm values.
pub fn deep_merge(base: &mut RenderedValues, overlay: RenderedValues) {
    for (key, value) in overlay {
        if let Value::Object(overlay_map) = value {
            if let Some(Value::Object(base_map)) = base.get_mut(&key) {
                merge_objects(base_map, overlay_map);
                continue;
            }
            base.insert(key, Value::Object(overlay_map));
        } else {
            base.insert(key, value);
        }
    }
}

fn merge_objects(
    base: &mut serde_json::Map<String, Value>,
    overlay: serde_json::Map<String, Value>,
) {
    for (key, value) in overlay {
        if let Value::Object(overlay_map) = value {
            if let Some(Value::Object(base_map)) = base.get_mut(&key) {
                merge_objects(base_map, overlay_map);
                continue;
            }
            base.insert(key, Value::Object(overlay_map));
        } else {
            base.insert(key, value);
        }
    }
}

/// Scan merged values for structures known to cause trouble downstream.
///
/// Currently flags keys beginning with an underscore. Warnings are logged,
/// never fatal.
#[must_use]
pub fn validate_values(values: &RenderedValues) -> Vec<String> {
    let mut warnings = Vec::new();
    if values.is_empty() {
        warnings.push("values are empty".to_string());
    }
    for (key, value) in values {
        check_nested(key, value, &mut warnings);
        if key.starts_with('_') {
            warnings.push(format!("key '{key}' starts with underscore"));
        }
    }
    warnings
}

fn check_nested(path: &str, value: &Value, warnings: &mut Vec<String>) {
    if let Value::Object(map) = value {
        for (key, nested) in map {
            if key.starts_with('_') {
                warnings.push(format!("key '{path}.{key}' starts with underscore"));
            }
            check_nested(&format!("{path}.{key}"), nested, warnings);
        }
    }
}

async fn load_from_configmap(
    client: &Client,
    config_ref: &ValuesSourceRef,
    default_namespace: &str,
) -> Result<Option<RenderedValues>, ValuesError> {
    let namespace = config_ref.namespace.as_deref().unwrap_or(default_namespace);
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);

    let configmap = get_or_missing(&api, &config_ref.name, "ConfigMap", namespace).await?;

    let Some(payload) = configmap.data.as_ref().and_then(|d| d.get(&config_ref.key)) else {
        warn!(
            configmap = %config_ref.name,
            namespace = %namespace,
            key = %config_ref.key,
            "Key not found in ConfigMap, skipping source"
        );
        return Ok(None);
    };

    parse_payload(payload, "ConfigMap", &config_ref.name, namespace).map(Some)
}

async fn load_from_secret(
    client: &Client,
    secret_ref: &ValuesSourceRef,
    default_namespace: &str,
) -> Result<Option<RenderedValues>, ValuesError> {
    let namespace = secret_ref.namespace.as_deref().unwrap_or(default_namespace);
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);

    let name = secret_ref.name.clone();
    let secret = retry_kube("get secret", || api.get_opt(&name))
        .await?
        .ok_or_else(|| ValuesError::MissingSource {
            kind: "Secret",
            name: secret_ref.name.clone(),
            namespace: namespace.to_string(),
        })?;

    let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(&secret_ref.key)) else {
        warn!(
            secret = %secret_ref.name,
            namespace = %namespace,
            key = %secret_ref.key,
            "Key not found in Secret, skipping source"
        );
        return Ok(None);
    };

    // Payload stays out of logs and error details
    let text = std::str::from_utf8(&bytes.0).map_err(|_| ValuesError::ParseFailure {
        kind: "Secret",
        name: secret_ref.name.clone(),
        namespace: namespace.to_string(),
        detail: "payload is not valid UTF-8".to_string(),
    })?;

    match serde_yaml::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(Some(map.into_iter().collect())),
        Ok(Value::Null) => Ok(Some(RenderedValues::new())),
        Ok(_) => Err(ValuesError::ParseFailure {
            kind: "Secret",
            name: secret_ref.name.clone(),
            namespace: namespace.to_string(),
            detail: "payload is not a mapping".to_string(),
        }),
        Err(_) => Err(ValuesError::ParseFailure {
            kind: "Secret",
            name: secret_ref.name.clone(),
            namespace: namespace.to_string(),
            detail: "payload is not valid YAML".to_string(),
        }),
    }
}

/// Load the environment overlay, trying the well-known ConfigMap names in
/// order. A missing overlay is not an error; the first present ConfigMap
/// wins.
async fn load_env_overlay(
    client: &Client,
    env: Environment,
    namespace: &str,
) -> Result<Option<RenderedValues>, ValuesError> {
    let candidates = [
        format!("herd-env-{env}"),
        format!("stack-env-{env}"),
        format!("values-{env}"),
        format!("{env}-values"),
    ];

    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    for name in &candidates {
        let configmap = retry_kube("get env overlay configmap", || api.get_opt(name)).await?;
        let Some(configmap) = configmap else {
            continue;
        };
        let Some(payload) = configmap.data.as_ref().and_then(|d| d.get("values.yaml")) else {
            continue;
        };
        return parse_payload(payload, "ConfigMap", name, namespace).map(Some);
    }

    debug!(env = %env, "No environment overlay found");
    Ok(None)
}

/// Load per-cluster override values from the referenced ConfigMap.
///
/// The ConfigMap must exist; a missing `{clusterId}.yaml` key is a no-op.
async fn load_cluster_override(
    client: &Client,
    config_ref: &ValuesSourceRef,
    cluster_id: &str,
    default_namespace: &str,
) -> Result<Option<RenderedValues>, ValuesError> {
    let namespace = config_ref.namespace.as_deref().unwrap_or(default_namespace);
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);

    let configmap = get_or_missing(&api, &config_ref.name, "ConfigMap", namespace).await?;

    let cluster_key = format!("{cluster_id}.yaml");
    let Some(payload) = configmap.data.as_ref().and_then(|d| d.get(&cluster_key)) else {
        debug!(cluster_id = %cluster_id, "No cluster override entry, skipping");
        return Ok(None);
    };

    parse_payload(payload, "ConfigMap", &config_ref.name, namespace).map(Some)
}

async fn get_or_missing(
    api: &Api<ConfigMap>,
    name: &str,
    kind: &'static str,
    namespace: &str,
) -> Result<ConfigMap, ValuesError> {
    retry_kube("get configmap", || api.get_opt(name))
        .await?
        .ok_or_else(|| ValuesError::MissingSource {
            kind,
            name: name.to_string(),
            namespace: namespace.to_string(),
        })
}

fn parse_payload(
    payload: &str,
    kind: &'static str,
    name: &str,
    namespace: &str,
) -> Result<RenderedValues, ValuesError> {
    match serde_yaml::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
        Ok(Value::Null) => Ok(RenderedValues::new()),
        Ok(_) => Err(ValuesError::ParseFailure {
            kind,
            name: name.to_string(),
            namespace: namespace.to_string(),
            detail: "payload is not a mapping".to_string(),
        }),
        Err(e) => Err(ValuesError::ParseFailure {
            kind,
            name: name.to_string(),
            namespace: namespace.to_string(),
            detail: e.to_string(),
        }),
    }
}

#[cfg(test)]
#[path = "values_tests.rs"]
mod values_tests;
