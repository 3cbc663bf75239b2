// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Unit tests for `rancher.rs`

#[cfg(test)]
mod tests {
    use crate::config::RancherConfig;
    use crate::rancher::{InventoryError, RancherClient};
    use crate::reconcilers::retry::{ErrorClass, Retryable};
    use std::time::Duration;

    fn config(url: &str) -> RancherConfig {
        RancherConfig {
            url: url.to_string(),
            token: "token-abc:secret".to_string(),
            verify_ssl: true,
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_base_url_appends_v3() {
        let client = RancherClient::new(&config("https://rancher.example.com")).unwrap();
        assert_eq!(client.base_url(), "https://rancher.example.com/v3");
    }

    #[test]
    fn test_base_url_strips_trailing_slash() {
        let client = RancherClient::new(&config("https://rancher.example.com/")).unwrap();
        assert_eq!(client.base_url(), "https://rancher.example.com/v3");
    }

    #[test]
    fn test_base_url_keeps_existing_v3() {
        let client = RancherClient::new(&config("https://rancher.example.com/v3")).unwrap();
        assert_eq!(client.base_url(), "https://rancher.example.com/v3");
    }

    #[test]
    fn test_inventory_error_classification() {
        let transient = InventoryError::Transient("connection refused".to_string());
        let permanent = InventoryError::Permanent("401 Unauthorized".to_string());
        assert_eq!(transient.error_class(), ErrorClass::Transient);
        assert_eq!(permanent.error_class(), ErrorClass::Permanent);
    }

    #[test]
    fn test_cluster_collection_deserializes_rancher_shape() {
        let json = serde_json::json!({
            "type": "collection",
            "data": [
                {
                    "id": "c-m-abc123",
                    "name": "edge-1",
                    "labels": { "env": "prod", "gpu": "true" },
                    "state": "active"
                },
                {
                    "id": "local",
                    "state": "active"
                }
            ]
        });

        let collection: super::super::ClusterCollection =
            serde_json::from_value(json).unwrap();
        assert_eq!(collection.data.len(), 2);
        assert_eq!(collection.data[0].labels.get("gpu").unwrap(), "true");
        assert_eq!(collection.data[1].id, "local");
        assert!(collection.data[1].name.is_none());
    }
}
