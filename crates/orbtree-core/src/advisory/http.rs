//! HTTP advisory gateway client
//!
//! POSTs `{"graph": <SimplifiedGraph>}` to a configured endpoint and expects
//! an [`AdvisoryResult`] JSON body back.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use crate::advisory::error::GatewayError;
use crate::advisory::gateway::AdvisoryGateway;
use crate::advisory::model::{AdvisoryResult, SimplifiedGraph};

pub const DEFAULT_USER_AGENT: &str = concat!("orbtree/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct ProposeRequest<'a> {
    graph: &'a SimplifiedGraph,
}

/// Advisory gateway reached over HTTP
pub struct HttpAdvisoryGateway {
    endpoint: String,
    token: Option<String>,
    http_client: reqwest::Client,
}

impl HttpAdvisoryGateway {
    /// Create a client for `endpoint`
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        user_agent: &str,
    ) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            token,
            http_client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AdvisoryGateway for HttpAdvisoryGateway {
    async fn propose_orderings(
        &self,
        graph: &SimplifiedGraph,
    ) -> Result<AdvisoryResult, GatewayError> {
        let mut request = self
            .http_client
            .post(&self.endpoint)
            .json(&ProposeRequest { graph });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        let status = response.status();
        debug!(endpoint = %self.endpoint, status = %status, "advisory gateway responded");

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::RateLimited {
                retry_after_secs: retry_after(response.headers()),
            });
        }
        if !status.is_success() {
            return Err(GatewayError::Unavailable(format!("HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        parse_body(&body)
    }
}

fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn parse_body(body: &[u8]) -> Result<AdvisoryResult, GatewayError> {
    serde_json::from_slice(body).map_err(|e| GatewayError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("42"));
        assert_eq!(retry_after(&headers), Some(42));
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn test_parse_body_malformed() {
        assert!(matches!(
            parse_body(b"<html>oops</html>"),
            Err(GatewayError::Malformed(_))
        ));
        let ok = parse_body(br#"{"strategies":[],"analysis_summary":"none"}"#).unwrap();
        assert_eq!(ok.analysis_summary, "none");
    }

    #[test]
    fn test_request_shape() {
        let graph = SimplifiedGraph::default();
        let value = serde_json::to_value(ProposeRequest { graph: &graph }).unwrap();
        assert_eq!(value, serde_json::json!({"graph": {"workspaces": []}}));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let gateway =
            HttpAdvisoryGateway::new("http://127.0.0.1:9/propose", None, DEFAULT_USER_AGENT)
                .unwrap();
        let err = gateway
            .propose_orderings(&SimplifiedGraph::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }
}
