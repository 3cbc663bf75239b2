// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Unit tests for `duration.rs`

#[cfg(test)]
mod tests {
    use crate::duration::{parse_timeout, timeout_or_default};
    use std::time::Duration;

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_timeout("300s"), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_parse_minutes() {
        assert_eq!(parse_timeout("10m"), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_parse_hours() {
        assert_eq!(parse_timeout("2h"), Some(Duration::from_secs(7200)));
    }

    #[test]
    fn test_parse_bare_integer_is_seconds() {
        assert_eq!(parse_timeout("45"), Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_parse_trims_and_lowercases() {
        assert_eq!(parse_timeout(" 5M "), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_timeout(""), None);
        assert_eq!(parse_timeout("abc"), None);
        assert_eq!(parse_timeout("10x"), None);
        assert_eq!(parse_timeout("m"), None);
    }

    #[test]
    fn test_default_is_ten_minutes() {
        assert_eq!(timeout_or_default(None), Duration::from_secs(600));
    }

    #[test]
    fn test_invalid_falls_back_to_default() {
        assert_eq!(timeout_or_default(Some("bogus")), Duration::from_secs(600));
    }

    #[test]
    fn test_valid_overrides_default() {
        assert_eq!(timeout_or_default(Some("30s")), Duration::from_secs(30));
    }
}
