//! Shared handling of Google API responses.

use reqwest::StatusCode;

/// Error reasons Google reports on quota exhaustion. Drive uses 403 for
/// these, so the status code alone is not enough.
const RATE_LIMIT_REASONS: [&str; 3] = [
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "RATE_LIMIT_EXCEEDED",
];

/// How a failed call should be treated by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ApiFailure {
    /// Worth retrying later
    Transient(String),
    /// Credentials are bad, stop
    Auth(String),
    /// The request itself was refused
    Rejected { status: u16, body: String },
}

pub(crate) fn classify(status: StatusCode, body: &str) -> ApiFailure {
    let code = status.as_u16();
    let rate_limited = RATE_LIMIT_REASONS.iter().any(|reason| body.contains(reason));

    match code {
        429 => ApiFailure::Transient(format!("HTTP {}: rate limited", code)),
        403 if rate_limited => ApiFailure::Transient(format!("HTTP {}: rate limited", code)),
        401 | 403 => ApiFailure::Auth(format!("HTTP {}: {}", code, summarize(body))),
        _ if status.is_server_error() => {
            ApiFailure::Transient(format!("HTTP {}: {}", code, summarize(body)))
        }
        _ => ApiFailure::Rejected {
            status: code,
            body: summarize(body),
        },
    }
}

/// Transport errors (connect, timeout, reset) are always transient.
pub(crate) fn transport(err: reqwest::Error) -> ApiFailure {
    ApiFailure::Transient(err.to_string())
}

/// Turn an unsuccessful response into an `ApiFailure`, consuming the body.
pub(crate) async fn failure_from(response: reqwest::Response) -> ApiFailure {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    classify(status, &body)
}

fn summarize(body: &str) -> String {
    const MAX: usize = 300;
    let body = body.trim();
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_statuses() {
        assert!(matches!(classify(StatusCode::UNAUTHORIZED, ""), ApiFailure::Auth(_)));
        assert!(matches!(
            classify(StatusCode::FORBIDDEN, r#"{"error":{"status":"PERMISSION_DENIED"}}"#),
            ApiFailure::Auth(_)
        ));
        assert!(matches!(
            classify(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiFailure::Transient(_)
        ));
        assert!(matches!(
            classify(StatusCode::SERVICE_UNAVAILABLE, "down"),
            ApiFailure::Transient(_)
        ));
        assert_eq!(
            classify(StatusCode::BAD_REQUEST, "bad query"),
            ApiFailure::Rejected {
                status: 400,
                body: "bad query".to_string()
            }
        );
    }

    #[test]
    fn test_forbidden_rate_limit_is_transient() {
        let body = r#"{"error":{"code":403,"errors":[{"reason":"userRateLimitExceeded"}]}}"#;
        assert!(matches!(
            classify(StatusCode::FORBIDDEN, body),
            ApiFailure::Transient(_)
        ));
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        match classify(StatusCode::BAD_REQUEST, &body) {
            ApiFailure::Rejected { body, .. } => assert_eq!(body.len(), 303),
            other => panic!("unexpected {:?}", other),
        }
    }
}
