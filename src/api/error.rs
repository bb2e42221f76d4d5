use reqwest::header::CONTENT_TYPE;
use thiserror::Error;

use crate::models::ErrorBody;

/// Error taxonomy surfaced by the client core.
///
/// Every variant owns its data, so errors can be cloned and fanned out to all
/// waiters of a coalesced call. Network failures are classified once, at the
/// reqwest boundary, and carry only their rendered message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{message} (status {status})")]
    Remote { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("cache corrupted: {0}")]
    CacheCorruption(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ApiError {
    /// True for failures of the HTTP exchange itself, as opposed to a
    /// completed exchange with a non-2xx status. Drives both retry
    /// eligibility and cache-fallback eligibility.
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn storage(msg: impl std::fmt::Display) -> Self {
        ApiError::Storage(msg.to_string())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Map a non-2xx response to a `Remote` error, extracting the message from a
/// JSON error body when one is present and falling back to the HTTP status
/// text, then to a generic message.
pub async fn normalize_error(resp: reqwest::Response) -> ApiError {
    let status = resp.status();
    let is_json = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("json"))
        .unwrap_or(false);
    let body = resp.bytes().await.unwrap_or_default();

    let mut message = String::new();
    if is_json && !body.is_empty() {
        if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(&body) {
            if let Some(m) = parsed.message {
                if !m.is_empty() {
                    message = m;
                }
            }
        }
    }
    if message.is_empty() {
        message = status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| "request failed".to_string());
    }

    ApiError::Remote {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, content_type: &str, body: &str) -> reqwest::Response {
        http::Response::builder()
            .status(status)
            .header(CONTENT_TYPE, content_type)
            .body(body.to_string())
            .unwrap()
            .into()
    }

    #[tokio::test]
    async fn message_comes_from_json_error_body() {
        let resp = response(409, "application/json", r#"{"code":409,"message":"login taken"}"#);
        let err = normalize_error(resp).await;
        assert_eq!(
            err,
            ApiError::Remote {
                status: 409,
                message: "login taken".to_string()
            }
        );
    }

    #[tokio::test]
    async fn falls_back_to_status_text_for_non_json_bodies() {
        let resp = response(502, "text/html", "<html>bad gateway</html>");
        let err = normalize_error(resp).await;
        assert_eq!(
            err,
            ApiError::Remote {
                status: 502,
                message: "Bad Gateway".to_string()
            }
        );
    }

    #[tokio::test]
    async fn empty_json_message_falls_back_to_status_text() {
        let resp = response(401, "application/json", r#"{"message":""}"#);
        let err = normalize_error(resp).await;
        assert_eq!(
            err,
            ApiError::Remote {
                status: 401,
                message: "Unauthorized".to_string()
            }
        );
    }

    #[test]
    fn network_classification() {
        assert!(ApiError::Network("timed out".into()).is_network());
        assert!(!ApiError::Remote { status: 500, message: "x".into() }.is_network());
        assert!(!ApiError::NotAuthenticated.is_network());
    }
}
