//! # Error Handling
//!
//! Errors produced while fetching a resource list. Every failure is resolved
//! into a [`FetchError`] value inside the polling loop; none of them escape a
//! poll session as a panic or an unhandled task error.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

/// Failure of a single list request.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request was aborted through its cancellation token.
    #[error("request was cancelled")]
    Cancelled,

    /// Connection-level failure reported by the HTTP client.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success status returned by the API server.
    #[error("Error {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body did not match the expected list shape.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Descriptor could not be resolved against the API base URL.
    #[error("invalid request descriptor '{descriptor}': {source}")]
    InvalidDescriptor {
        descriptor: String,
        source: url::ParseError,
    },
}

impl FetchError {
    /// Returns true when the failure came from aborting the request.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }

    /// Status code reported by the server, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::Network(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    /// Build a status error from a raw response body.
    ///
    /// 404 responses carry an empty `{ message: '' }` body, so only the reason
    /// phrase is kept for them. Other statuses append the body's `message`
    /// field when it is JSON, or the raw text otherwise.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let reason = status.canonical_reason().unwrap_or("Unknown");
        let message = if status == reqwest::StatusCode::NOT_FOUND {
            reason.to_string()
        } else {
            match body_message(body) {
                Some(detail) => format!("{reason} - {detail}"),
                None => reason.to_string(),
            }
        };

        FetchError::Status {
            status: status.as_u16(),
            message,
        }
    }
}

/// Shared handle to an error kept in published poll state.
pub type SharedFetchError = Arc<FetchError>;

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Object { message: String },
    Text(String),
}

fn body_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let detail = match serde_json::from_str::<ErrorBody>(trimmed) {
        Ok(ErrorBody::Object { message }) | Ok(ErrorBody::Text(message)) => message,
        Err(_) => trimmed.to_string(),
    };

    if detail.is_empty() { None } else { Some(detail) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn not_found_skips_body_message() {
        let err = FetchError::from_status(StatusCode::NOT_FOUND, r#"{"message":""}"#);
        assert_eq!(err.to_string(), "Error 404: Not Found");
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn json_message_is_appended() {
        let err = FetchError::from_status(
            StatusCode::BAD_REQUEST,
            r#"{"message":"invalid continue token"}"#,
        );
        assert_eq!(
            err.to_string(),
            "Error 400: Bad Request - invalid continue token"
        );
    }

    #[test]
    fn plain_text_body_is_appended() {
        let err = FetchError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "backend down\n");
        assert_eq!(
            err.to_string(),
            "Error 500: Internal Server Error - backend down"
        );
    }

    #[test]
    fn empty_body_keeps_reason_only() {
        let err = FetchError::from_status(StatusCode::SERVICE_UNAVAILABLE, "");
        assert_eq!(err.to_string(), "Error 503: Service Unavailable");
    }

    #[test]
    fn only_cancelled_is_cancellation() {
        assert!(FetchError::Cancelled.is_cancellation());
        let status = FetchError::Status {
            status: 500,
            message: "boom".into(),
        };
        assert!(!status.is_cancellation());
    }
}
