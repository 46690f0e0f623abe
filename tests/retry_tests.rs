/// Retry loop behavior for upstream provider calls.
/// Exercises attempt counting, error classification and exhaustion
/// with scripted closures so no real backoff or network is involved.
use lookup_broker::providers::TransportError;
use lookup_broker::retry::{call_with_retry, RetryPolicy, UpstreamError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::ZERO)
}

#[tokio::test]
async fn clean_payload_returns_on_the_first_attempt() {
    let calls = AtomicU32::new(0);
    let result = call_with_retry(&fast_policy(5), || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, TransportError>(json!({"operator": "Jio", "circle": "Maharashtra"})) }
    })
    .await;

    assert_eq!(result.unwrap()["operator"], "Jio");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transient_embedded_errors_are_retried_until_success() {
    let calls = AtomicU32::new(0);
    let result = call_with_retry(&fast_policy(10), || {
        let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if attempt <= 3 {
                Ok::<_, TransportError>(json!({"error": "Internal error, try again"}))
            } else {
                Ok(json!({"name": "recovered"}))
            }
        }
    })
    .await;

    assert_eq!(result.unwrap()["name"], "recovered");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn server_error_marker_is_also_retryable() {
    let calls = AtomicU32::new(0);
    let result = call_with_retry(&fast_policy(5), || {
        let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if attempt == 1 {
                Ok::<_, TransportError>(json!({"error": "Upstream SERVER ERROR"}))
            } else {
                Ok(json!({"status": "ok"}))
            }
        }
    })
    .await;

    assert!(result.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn absence_is_terminal_on_the_first_attempt() {
    let calls = AtomicU32::new(0);
    let result = call_with_retry(&fast_policy(5), || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, TransportError>(json!({"error": "Record not found"})) }
    })
    .await;

    assert_eq!(
        result,
        Err(UpstreamError::Absent("Record not found".to_string()))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejection_is_terminal_on_the_first_attempt() {
    let calls = AtomicU32::new(0);
    let result = call_with_retry(&fast_policy(5), || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, TransportError>(json!({"error": "Invalid API key"})) }
    })
    .await;

    assert_eq!(
        result,
        Err(UpstreamError::Rejected("Invalid API key".to_string()))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transport_failures_exhaust_the_policy() {
    let calls = AtomicU32::new(0);
    let result = call_with_retry(&fast_policy(5), || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<Value, _>(TransportError("connection refused".to_string())) }
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 5);
    match result {
        Err(UpstreamError::Exhausted {
            last_error,
            attempts,
        }) => {
            assert_eq!(attempts, 5);
            assert!(last_error.contains("connection refused"));
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
}

#[tokio::test]
async fn exhaustion_carries_the_last_embedded_error() {
    let result = call_with_retry(&fast_policy(3), || async {
        Ok::<_, TransportError>(json!({"error": "internal error 503"}))
    })
    .await;

    assert_eq!(
        result,
        Err(UpstreamError::Exhausted {
            last_error: "internal error 503".to_string(),
            attempts: 3,
        })
    );
}

#[tokio::test]
async fn absence_still_wins_after_a_transport_retry() {
    let calls = AtomicU32::new(0);
    let result = call_with_retry(&fast_policy(5), || {
        let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if attempt == 1 {
                Err(TransportError("timed out".to_string()))
            } else {
                Ok(json!({"error": "no data for this number"}))
            }
        }
    })
    .await;

    assert!(matches!(result, Err(UpstreamError::Absent(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn zero_attempt_policy_is_clamped_to_one() {
    let policy = RetryPolicy::new(0, Duration::ZERO);
    assert_eq!(policy.max_attempts, 1);

    let calls = AtomicU32::new(0);
    let result = call_with_retry(&policy, || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<Value, _>(TransportError("down".to_string())) }
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        result,
        Err(UpstreamError::Exhausted { attempts: 1, .. })
    ));
}
