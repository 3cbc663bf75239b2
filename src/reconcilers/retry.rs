// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Unified retry with exponential backoff for external calls.
//!
//! Herd talks to two control planes: the Kubernetes API server (values
//! sources, status writes, Bundles) and the Rancher management API (cluster
//! inventory). Both go through the same retry engine: errors classify
//! themselves as transient or permanent via [`Retryable`], and a
//! [`BackoffPolicy`] turns the attempt number into a jittered delay.
//! Permanent errors (4xx client errors, bad specs) fail immediately;
//! transient ones (429, 5xx, connection trouble) retry until the policy's
//! deadline runs out.

use rand::Rng;
use reqwest::StatusCode;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Whether another attempt at a failed call could succeed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limiting, server errors, connection trouble; worth retrying
    Transient,
    /// Client errors and invalid requests; retrying cannot help
    Permanent,
}

/// Errors that can tell the retry loop whether another attempt may help.
pub trait Retryable {
    /// Classify this error for the retry loop.
    fn error_class(&self) -> ErrorClass;
}

impl Retryable for kube::Error {
    fn error_class(&self) -> ErrorClass {
        match self {
            kube::Error::Api(response)
                if response.code == 429 || (500..600).contains(&response.code) =>
            {
                ErrorClass::Transient
            }
            // Network and connection errors
            kube::Error::Service(_) => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }
}

/// Whether an HTTP status from the Rancher API is worth retrying.
///
/// 429 and the 5xx family retry; everything else is treated as a client
/// error and surfaces immediately.
#[must_use]
pub fn transient_http_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Delay schedule for one class of external call.
///
/// Delays grow geometrically from `initial` by `factor` per attempt, are
/// capped at `max_delay`, and carry ± `jitter` randomization so a fleet of
/// controllers does not retry in lockstep. `deadline` bounds the total time
/// spent on one logical call including sleeps.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    /// Delay before the second attempt
    pub initial: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
    /// Total time budget for the call, attempts and sleeps included
    pub deadline: Duration,
    /// Geometric growth factor between attempts
    pub factor: f64,
    /// Fractional jitter applied to each delay (0.1 = ±10%)
    pub jitter: f64,
}

impl BackoffPolicy {
    /// Policy for Kubernetes API calls: 100ms initial, 30s cap, 5 minute
    /// deadline.
    #[must_use]
    pub fn kube_api() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            deadline: Duration::from_secs(300),
            factor: 2.0,
            jitter: 0.1,
        }
    }

    /// Policy for Rancher management API calls: the inventory endpoint is a
    /// single upstream that should fail fast, so 50ms initial, 10s cap, 2
    /// minute deadline.
    #[must_use]
    pub fn rancher_http() -> Self {
        Self {
            initial: Duration::from_millis(50),
            max_delay: Duration::from_secs(10),
            deadline: Duration::from_secs(120),
            factor: 2.0,
            jitter: 0.1,
        }
    }

    /// The jittered delay to sleep after the nth failed attempt (1-based).
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let raw = self.initial.as_secs_f64() * self.factor.powi(exponent as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());

        if self.jitter <= 0.0 {
            return Duration::from_secs_f64(capped);
        }

        let spread = capped * self.jitter;
        let jittered = rand::thread_rng().gen_range((capped - spread)..=(capped + spread));
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Run `call` under a backoff policy until it succeeds, fails permanently,
/// or the policy's deadline would be exceeded by the next sleep.
///
/// The original error type is preserved so callers keep their own error
/// taxonomy (`kube::Error`, `InventoryError`, ...).
///
/// # Errors
///
/// Returns the last error when it is permanent or the deadline is spent.
pub async fn with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match call().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation,
                        attempt,
                        elapsed = ?started.elapsed(),
                        "Call succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.error_class() == ErrorClass::Permanent => {
                error!(operation, error = %err, "Permanent error, not retrying");
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                if started.elapsed() + delay >= policy.deadline {
                    error!(
                        operation,
                        attempt,
                        elapsed = ?started.elapsed(),
                        error = %err,
                        "Retry deadline spent, giving up"
                    );
                    return Err(err);
                }

                warn!(
                    operation,
                    attempt,
                    retry_in = ?delay,
                    error = %err,
                    "Transient error, will retry"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Retry a Kubernetes API call under the standard policy.
///
/// Convenience wrapper over [`with_backoff`] for the common case, folding
/// the exhausted error into `anyhow` for reconciler-level propagation.
///
/// # Errors
///
/// Returns the underlying `kube::Error` (as `anyhow`) once it is permanent
/// or the retry deadline is spent.
pub async fn retry_kube<T, F, Fut>(operation: &str, call: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, kube::Error>>,
{
    with_backoff(&BackoffPolicy::kube_api(), operation, call)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
