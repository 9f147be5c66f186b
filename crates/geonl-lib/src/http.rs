//! Shared HTTP client and status mapping for the adapters.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result, SourceError};

/// Thin wrapper around one pooled [`reqwest::Client`].
///
/// Timeouts are not configured here; the aggregator bounds each attempt
/// with the per-source policy.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    inner: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(user_agent: &str) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(8)
            .build()
            .map_err(Error::Http)?;
        Ok(Self { inner })
    }

    /// GET `url` and decode the body as JSON.
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: HeaderMap,
    ) -> std::result::Result<Value, SourceError> {
        debug!(url, params = query.len(), "upstream request");

        let response = self
            .inner
            .get(url)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .headers(headers)
            .query(query)
            .send()
            .await
            .map_err(|err| SourceError::Unreachable(describe(&err)))?;

        let status = response.status();
        let retry_after = retry_after_secs(response.headers());
        let body = response
            .text()
            .await
            .map_err(|err| SourceError::Unreachable(describe(&err)))?;

        if let Some(err) = status_to_error(status, retry_after, &body) {
            return Err(err);
        }

        serde_json::from_str(&body).map_err(SourceError::malformed)
    }
}

/// Map a non-success status to the adapter taxonomy.
pub fn status_to_error(
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: &str,
) -> Option<SourceError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited { retry_after_secs },
        StatusCode::NOT_FOUND => SourceError::NotFound,
        _ => SourceError::Upstream(format!("HTTP {}: {}", status.as_u16(), snippet(body))),
    })
}

fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(200) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_to_error(StatusCode::OK, None, ""), None);
        assert_eq!(
            status_to_error(StatusCode::TOO_MANY_REQUESTS, Some(3), ""),
            Some(SourceError::RateLimited {
                retry_after_secs: Some(3)
            })
        );
        assert_eq!(
            status_to_error(StatusCode::NOT_FOUND, None, "nope"),
            Some(SourceError::NotFound)
        );
        let err = status_to_error(StatusCode::BAD_GATEWAY, None, "gateway down").unwrap();
        assert_eq!(err, SourceError::Upstream("HTTP 502: gateway down".into()));
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(500);
        let Some(SourceError::Upstream(message)) =
            status_to_error(StatusCode::INTERNAL_SERVER_ERROR, None, &body)
        else {
            panic!("expected upstream error");
        };
        assert!(message.len() < 220);
        assert!(message.ends_with("..."));
    }
}
