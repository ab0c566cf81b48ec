//! Thin Jira REST v2 client.

use keyhost_application::{ConfigurationError, OperationError};
use keyhost_integration::Credential;
use reqwest::{Method, RequestBuilder, StatusCode};
use rootcause::prelude::Report;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, instrument};

/// Longest upstream error body carried into an error message.
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for one Jira site.
#[derive(Debug, Clone)]
pub struct JiraClient {
    http: reqwest::Client,
    base_url: String,
}

impl JiraClient {
    /// Creates a client for the Jira site at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not http(s) or the HTTP client cannot
    /// be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, Report<ConfigurationError>> {
        let base_url = base_url.trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigurationError::InvalidSetting {
                key: "jira.base_url".to_string(),
                reason: format!("'{base_url}' is not an http(s) URL"),
            }
            .into());
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigurationError::InvalidSetting {
                key: "jira".to_string(),
                reason: format!("building HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
        })
    }

    /// Returns the absolute URL for a REST path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}/rest/api/2/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Starts a request, attaching the credential as a bearer token if given.
    pub(crate) fn request(
        &self,
        method: Method,
        path: &str,
        credential: Option<&Credential>,
    ) -> RequestBuilder {
        let request = self.http.request(method, self.url(path));
        match credential {
            Some(credential) => request.bearer_auth(credential.expose()),
            None => request,
        }
    }

    /// Sends a request and decodes a JSON response.
    #[instrument(skip_all)]
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<JsonValue, OperationError> {
        let response = request.send().await.map_err(|e| OperationError::Upstream {
            status: None,
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        debug!(status = status.as_u16(), "jira request succeeded");
        if status == StatusCode::NO_CONTENT {
            return Ok(JsonValue::Null);
        }
        response.json().await.map_err(|e| OperationError::Upstream {
            status: Some(status.as_u16()),
            reason: format!("decoding response: {e}"),
        })
    }
}

/// Maps a non-success response to an operation error.
///
/// 401 and 403 mean the credential itself was refused.
pub(crate) fn classify_failure(status: StatusCode, body: &str) -> OperationError {
    let mut reason = body.trim().to_string();
    if reason.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !reason.is_char_boundary(cut) {
            cut -= 1;
        }
        reason.truncate(cut);
    }
    if reason.is_empty() {
        reason = status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string();
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            OperationError::credential_rejected(format!("jira answered {status}: {reason}"))
        }
        _ => OperationError::Upstream {
            status: Some(status.as_u16()),
            reason,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_rest_urls() {
        let client = JiraClient::new("https://jira.example.com/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.url("issue/ABC-1"),
            "https://jira.example.com/rest/api/2/issue/ABC-1"
        );
        assert_eq!(
            client.url("/serverInfo"),
            "https://jira.example.com/rest/api/2/serverInfo"
        );
    }

    #[test]
    fn rejects_non_http_base_url() {
        assert!(JiraClient::new("jira.example.com", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn unauthorized_is_credential_rejected() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let err = classify_failure(status, "");
            assert!(matches!(err, OperationError::CredentialRejected { .. }));
        }
    }

    #[test]
    fn other_failures_are_upstream() {
        let err = classify_failure(StatusCode::NOT_FOUND, "{\"errorMessages\":[\"Issue does not exist\"]}");
        match err {
            OperationError::Upstream { status, reason } => {
                assert_eq!(status, Some(404));
                assert!(reason.contains("Issue does not exist"));
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(MAX_ERROR_BODY * 2);
        match classify_failure(StatusCode::BAD_GATEWAY, &body) {
            OperationError::Upstream { reason, .. } => assert_eq!(reason.len(), MAX_ERROR_BODY),
            other => panic!("expected upstream error, got {other:?}"),
        }
    }
}
