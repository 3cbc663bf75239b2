// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Timeout string parsing for chart and step deadlines.
//!
//! Accepts the Helm-style forms users put in `timeout` fields: `"300s"`,
//! `"10m"`, `"1h"`, or a bare integer of seconds.

use crate::constants::DEFAULT_CHART_TIMEOUT_SECS;
use std::time::Duration;
use tracing::warn;

/// Parse a timeout string into a `Duration`.
///
/// Supported units:
/// - `s` (seconds): `"300s"`
/// - `m` (minutes): `"10m"`
/// - `h` (hours): `"1h"`
/// - no unit: interpreted as seconds
///
/// # Examples
///
/// ```
/// use herd::duration::parse_timeout;
/// use std::time::Duration;
///
/// assert_eq!(parse_timeout("300s"), Some(Duration::from_secs(300)));
/// assert_eq!(parse_timeout("10m"), Some(Duration::from_secs(600)));
/// assert_eq!(parse_timeout("1h"), Some(Duration::from_secs(3600)));
/// assert_eq!(parse_timeout("45"), Some(Duration::from_secs(45)));
/// assert_eq!(parse_timeout("abc"), None);
/// ```
#[must_use]
pub fn parse_timeout(timeout: &str) -> Option<Duration> {
    let timeout = timeout.trim().to_lowercase();
    if timeout.is_empty() {
        return None;
    }

    let (value_str, multiplier) = match timeout.as_bytes().last() {
        Some(b's') => (&timeout[..timeout.len() - 1], 1),
        Some(b'm') => (&timeout[..timeout.len() - 1], 60),
        Some(b'h') => (&timeout[..timeout.len() - 1], 3600),
        _ => (timeout.as_str(), 1),
    };

    let value: u64 = value_str.parse().ok()?;
    Some(Duration::from_secs(value.checked_mul(multiplier)?))
}

/// Resolve an optional timeout field to a concrete deadline.
///
/// Missing or unparseable values fall back to the 10-minute default; an
/// invalid string is logged once per reconciliation rather than failing
/// the deployment.
#[must_use]
pub fn timeout_or_default(timeout: Option<&str>) -> Duration {
    match timeout {
        None => Duration::from_secs(DEFAULT_CHART_TIMEOUT_SECS),
        Some(raw) => parse_timeout(raw).unwrap_or_else(|| {
            warn!(timeout = raw, "Invalid timeout format, using default");
            Duration::from_secs(DEFAULT_CHART_TIMEOUT_SECS)
        }),
    }
}

#[cfg(test)]
#[path = "duration_tests.rs"]
mod duration_tests;
