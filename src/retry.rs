use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Retry behavior for upstream provider calls.
///
/// Providers report failure two ways: a failed transport call, or a 200
/// response whose payload embeds an `error` message. Transport failures
/// are always worth retrying. Embedded errors are classified by their
/// text: "not found" / "no data" mean the record does not exist and no
/// retry will change that, "internal error" / "server error" mean the
/// provider hiccuped and a retry may succeed, anything else means the
/// provider rejected the request outright. A fixed backoff separates
/// attempts; there is no sleep before the first attempt or after the
/// last.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Terminal outcome of a retried upstream call.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamError {
    /// The provider answered definitively that the record does not exist.
    Absent(String),
    /// The provider rejected the request for a non-retryable reason.
    Rejected(String),
    /// Every attempt failed with a retryable error.
    Exhausted { last_error: String, attempts: u32 },
}

enum ErrorClass {
    Absence,
    Transient,
    Terminal,
}

/// Keyword order matters: an absence marker wins over a server-error
/// marker when a message carries both.
fn classify_message(message: &str) -> ErrorClass {
    let lowered = message.to_lowercase();
    if lowered.contains("not found") || lowered.contains("no data") {
        ErrorClass::Absence
    } else if lowered.contains("internal error") || lowered.contains("server error") {
        ErrorClass::Transient
    } else {
        ErrorClass::Terminal
    }
}

/// Pulls the embedded error message out of a provider payload, if any.
/// Absent, null, `false` and empty-string values all mean "no error";
/// non-string values are stringified so they still classify.
fn embedded_error(payload: &Value) -> Option<String> {
    match payload.get("error") {
        None | Some(Value::Null) => None,
        Some(Value::Bool(false)) => None,
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Some(other) => Some(other.to_string()),
    }
}

/// Runs an upstream call under the given policy until it yields a clean
/// payload or a terminal outcome.
pub async fn call_with_retry<F, Fut, E>(
    policy: &RetryPolicy,
    mut call: F,
) -> Result<Value, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Value, E>>,
    E: std::fmt::Display,
{
    let mut last_error = String::from("no attempts made");
    for attempt in 1..=policy.max_attempts {
        if attempt > 1 {
            tokio::time::sleep(policy.backoff).await;
        }
        match call().await {
            Err(transport) => {
                last_error = transport.to_string();
                tracing::warn!(
                    "Upstream attempt {}/{} failed: {}",
                    attempt,
                    policy.max_attempts,
                    last_error
                );
            }
            Ok(payload) => match embedded_error(&payload) {
                None => {
                    if attempt > 1 {
                        tracing::info!("Upstream call recovered on attempt {}", attempt);
                    }
                    return Ok(payload);
                }
                Some(message) => match classify_message(&message) {
                    ErrorClass::Absence => return Err(UpstreamError::Absent(message)),
                    ErrorClass::Terminal => return Err(UpstreamError::Rejected(message)),
                    ErrorClass::Transient => {
                        last_error = message;
                        tracing::warn!(
                            "Upstream attempt {}/{} returned retryable error: {}",
                            attempt,
                            policy.max_attempts,
                            last_error
                        );
                    }
                },
            },
        }
    }

    Err(UpstreamError::Exhausted {
        last_error,
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absence_markers_classify_as_absence() {
        assert!(matches!(classify_message("Record not found"), ErrorClass::Absence));
        assert!(matches!(classify_message("NO DATA available"), ErrorClass::Absence));
    }

    #[test]
    fn server_markers_classify_as_transient() {
        assert!(matches!(classify_message("Internal Error"), ErrorClass::Transient));
        assert!(matches!(classify_message("upstream server error"), ErrorClass::Transient));
    }

    #[test]
    fn anything_else_is_terminal() {
        assert!(matches!(classify_message("invalid api key"), ErrorClass::Terminal));
        assert!(matches!(classify_message("rate limited"), ErrorClass::Terminal));
    }

    #[test]
    fn absence_wins_when_both_markers_present() {
        assert!(matches!(
            classify_message("internal error: record not found"),
            ErrorClass::Absence
        ));
    }

    #[test]
    fn embedded_error_extraction() {
        assert_eq!(embedded_error(&json!({"data": 1})), None);
        assert_eq!(embedded_error(&json!({"error": null})), None);
        assert_eq!(embedded_error(&json!({"error": ""})), None);
        assert_eq!(embedded_error(&json!({"error": "  "})), None);
        assert_eq!(embedded_error(&json!({"error": false})), None);
        assert_eq!(
            embedded_error(&json!({"error": "Not Found"})),
            Some("Not Found".to_string())
        );
        assert_eq!(embedded_error(&json!({"error": true})), Some("true".to_string()));
        assert_eq!(
            embedded_error(&json!({"error": {"code": 7}})),
            Some(r#"{"code":7}"#.to_string())
        );
    }
}
