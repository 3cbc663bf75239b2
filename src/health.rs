// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Liveness state for the `/healthz` endpoint.
//!
//! The endpoint reports 200 iff the controllers' watches have synced and
//! the most recent reconcile-loop heartbeat is within twice the resync
//! interval. Controllers call [`HealthState::heartbeat`] after every
//! reconciliation attempt (success or error).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Shared health state, cheap to clone behind an `Arc`.
pub struct HealthState {
    started: Instant,
    synced: AtomicBool,
    /// Milliseconds since `started` of the last heartbeat; 0 = never
    last_heartbeat_ms: AtomicU64,
    resync_interval: Duration,
}

impl HealthState {
    /// Create health state for the given resync interval.
    #[must_use]
    pub fn new(resync_interval: Duration) -> Self {
        Self {
            started: Instant::now(),
            synced: AtomicBool::new(false),
            last_heartbeat_ms: AtomicU64::new(0),
            resync_interval,
        }
    }

    /// Mark the controllers' watches as synced. Called once at startup when
    /// the controllers begin consuming events.
    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::Relaxed);
    }

    /// Record a reconcile-loop heartbeat.
    pub fn heartbeat(&self) {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_heartbeat_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Whether the process should report healthy.
    ///
    /// Healthy means: watches synced, and either no reconciliation has been
    /// needed yet (quiet cluster, process younger than the window) or the
    /// last heartbeat is within 2x the resync interval.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        if !self.synced.load(Ordering::Relaxed) {
            return false;
        }

        let window = self.resync_interval * 2;
        let last = self.last_heartbeat_ms.load(Ordering::Relaxed);
        let now_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if last == 0 {
            // No reconcile yet; healthy until the first window expires
            return now_ms < window.as_millis() as u64;
        }

        now_ms.saturating_sub(last) < window.as_millis() as u64
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod health_tests;
