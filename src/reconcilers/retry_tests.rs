// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Unit tests for `retry.rs`

#[cfg(test)]
mod tests {
    use super::super::{
        retry_kube, transient_http_status, with_backoff, BackoffPolicy, ErrorClass, Retryable,
    };
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn no_jitter(mut policy: BackoffPolicy) -> BackoffPolicy {
        policy.jitter = 0.0;
        policy
    }

    #[test]
    fn test_delays_grow_geometrically() {
        let policy = no_jitter(BackoffPolicy::kube_api());
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delays_cap_at_max() {
        let policy = no_jitter(BackoffPolicy::rancher_http());
        assert_eq!(policy.delay_for(20), Duration::from_secs(10));
        // Large attempt numbers must not overflow the exponent
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let policy = BackoffPolicy::kube_api();
        for attempt in 1..8 {
            let base = no_jitter(policy.clone()).delay_for(attempt).as_secs_f64();
            let jittered = policy.delay_for(attempt).as_secs_f64();
            assert!(jittered >= base * 0.9 - f64::EPSILON);
            assert!(jittered <= base * 1.1 + f64::EPSILON);
        }
    }

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "test".to_string(),
            code,
        })
    }

    #[test]
    fn test_kube_error_classification() {
        assert_eq!(api_error(429).error_class(), ErrorClass::Transient);
        assert_eq!(api_error(500).error_class(), ErrorClass::Transient);
        assert_eq!(api_error(503).error_class(), ErrorClass::Transient);
        assert_eq!(api_error(404).error_class(), ErrorClass::Permanent);
        assert_eq!(api_error(403).error_class(), ErrorClass::Permanent);
        assert_eq!(api_error(422).error_class(), ErrorClass::Permanent);
    }

    #[test]
    fn test_transient_http_statuses() {
        assert!(transient_http_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(transient_http_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(transient_http_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!transient_http_status(StatusCode::NOT_FOUND));
        assert!(!transient_http_status(StatusCode::UNAUTHORIZED));
        assert!(!transient_http_status(StatusCode::OK));
    }

    #[tokio::test]
    async fn test_with_backoff_succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(&BackoffPolicy::kube_api(), "test operation", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, kube::Error>(42) }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_backoff_fails_fast_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, kube::Error> =
            with_backoff(&BackoffPolicy::kube_api(), "test operation", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(api_error(404)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "404 must not be retried");
    }

    #[tokio::test]
    async fn test_with_backoff_preserves_the_error_type() {
        let result: Result<u32, kube::Error> =
            with_backoff(&BackoffPolicy::kube_api(), "test operation", || async {
                Err(api_error(403))
            })
            .await;

        match result {
            Err(kube::Error::Api(response)) => assert_eq!(response.code, 403),
            other => panic!("expected the original kube error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_with_backoff_gives_up_at_deadline() {
        // A zero deadline means even the first retry sleep would overrun it
        let policy = BackoffPolicy {
            deadline: Duration::ZERO,
            ..BackoffPolicy::kube_api()
        };

        let calls = AtomicU32::new(0);
        let result: Result<u32, kube::Error> =
            with_backoff(&policy, "test operation", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(api_error(503)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_kube_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry_kube("test operation", || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(api_error(503))
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
