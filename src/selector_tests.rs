// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Unit tests for `selector.rs`

#[cfg(test)]
mod tests {
    use crate::crd::TargetSelector;
    use crate::selector::matches_labels;
    use std::collections::BTreeMap;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_exact_match() {
        let selector = TargetSelector {
            match_labels: labels(&[("env", "prod")]),
        };
        assert!(matches_labels(&selector, &labels(&[("env", "prod")])));
    }

    #[test]
    fn test_superset_matches() {
        let selector = TargetSelector {
            match_labels: labels(&[("env", "prod")]),
        };
        assert!(matches_labels(
            &selector,
            &labels(&[("env", "prod"), ("gpu", "true")])
        ));
    }

    #[test]
    fn test_value_mismatch() {
        let selector = TargetSelector {
            match_labels: labels(&[("env", "prod")]),
        };
        assert!(!matches_labels(&selector, &labels(&[("env", "dev")])));
    }

    #[test]
    fn test_missing_key() {
        let selector = TargetSelector {
            match_labels: labels(&[("env", "prod"), ("gpu", "true")]),
        };
        assert!(!matches_labels(&selector, &labels(&[("env", "prod")])));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = TargetSelector {
            match_labels: BTreeMap::new(),
        };
        assert!(matches_labels(&selector, &labels(&[("env", "prod")])));
        assert!(matches_labels(&selector, &BTreeMap::new()));
    }

    #[test]
    fn test_multi_label_selection() {
        // Scenario: c-a{env:prod,gpu:true}, c-b{env:prod}, c-c{env:dev,gpu:true}
        let selector = TargetSelector {
            match_labels: labels(&[("env", "prod"), ("gpu", "true")]),
        };
        assert!(matches_labels(
            &selector,
            &labels(&[("env", "prod"), ("gpu", "true")])
        ));
        assert!(!matches_labels(&selector, &labels(&[("env", "prod")])));
        assert!(!matches_labels(
            &selector,
            &labels(&[("env", "dev"), ("gpu", "true")])
        ));
    }
}
