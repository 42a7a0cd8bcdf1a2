//! HTTP client for out-of-process provider plugins.
//!
//! A plugin exposes three JSON endpoints:
//! - `POST /resources` with `{type, name, attributes}`, answering `{id, outputs}`
//! - `PATCH /resources/{id}` with `{type, name, attributes}`, answering `{outputs}`
//! - `DELETE /resources/{id}`
//!
//! Error statuses are mapped onto [`ProviderErrorCode`]s; the body's
//! `message` field, when present, becomes the error message.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ProviderError, ProviderErrorCode, Result, TerraceError};
use crate::graph::{AttrMap, ResourceId};

use super::{Created, Provider};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Retry-after used when a 429 carries no usable header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Provider plugin client.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    endpoint: String,
    token: Option<String>,
    region: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResourceRequest<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<&'a str>,
    attributes: &'a AttrMap,
}

#[derive(Debug, Deserialize)]
struct UpdateResponse {
    #[serde(default)]
    outputs: AttrMap,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl HttpProvider {
    /// Creates a client for the plugin at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self> {
        Self::with_timeout(endpoint, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(endpoint: &str, token: Option<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TerraceError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
            region: None,
        })
    }

    /// Sets the region forwarded to the plugin.
    #[must_use]
    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header(header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn body<'a>(&'a self, id: &'a ResourceId, attributes: &'a AttrMap) -> ResourceRequest<'a> {
        ResourceRequest {
            kind: &id.kind,
            name: &id.name,
            region: self.region.as_deref(),
            attributes,
        }
    }

    /// Sends a request, mapping transport failures and error statuses.
    async fn send(&self, builder: reqwest::RequestBuilder) -> std::result::Result<Response, ProviderError> {
        let response = self
            .request(builder)
            .send()
            .await
            .map_err(|e| ProviderError::transient(format!("Request failed: {e}")))?;

        let status = response.status();
        trace!("Plugin answered {status}");
        if status.is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }
}

/// Maps an unsuccessful response onto a provider error.
async fn error_from_response(response: Response) -> ProviderError {
    let status = response.status();

    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok());

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.message)
        .unwrap_or_else(|_| if text.is_empty() { status.to_string() } else { text });

    let code = match status {
        StatusCode::TOO_MANY_REQUESTS => {
            return ProviderError {
                code: ProviderErrorCode::Throttled,
                message,
                retry_after_secs: Some(retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS)),
            };
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ProviderErrorCode::InvalidInput,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderErrorCode::PermissionDenied,
        StatusCode::PAYMENT_REQUIRED => ProviderErrorCode::QuotaExceeded,
        StatusCode::NOT_FOUND => ProviderErrorCode::NotFound,
        StatusCode::CONFLICT => ProviderErrorCode::Conflict,
        s if s.is_server_error() => ProviderErrorCode::Transient,
        _ => ProviderErrorCode::InvalidInput,
    };

    ProviderError {
        code,
        message,
        retry_after_secs: retry_after,
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn create(&self, id: &ResourceId, attributes: &AttrMap) -> std::result::Result<Created, ProviderError> {
        debug!("POST /resources for {id}");
        let response = self
            .send(self.client.post(self.url("/resources")).json(&self.body(id, attributes)))
            .await?;

        response
            .json::<Created>()
            .await
            .map_err(|e| ProviderError::transient(format!("Invalid create response: {e}")))
    }

    async fn update(
        &self,
        id: &ResourceId,
        provider_id: &str,
        changed: &AttrMap,
    ) -> std::result::Result<AttrMap, ProviderError> {
        debug!("PATCH /resources/{provider_id} for {id}");
        let response = self
            .send(
                self.client
                    .patch(self.url(&format!("/resources/{provider_id}")))
                    .json(&self.body(id, changed)),
            )
            .await?;

        response
            .json::<UpdateResponse>()
            .await
            .map(|r| r.outputs)
            .map_err(|e| ProviderError::transient(format!("Invalid update response: {e}")))
    }

    async fn delete(&self, id: &ResourceId, provider_id: &str) -> std::result::Result<(), ProviderError> {
        debug!("DELETE /resources/{provider_id} for {id}");
        self.send(
            self.client
                .delete(self.url(&format!("/resources/{provider_id}")))
                .query(&[("type", id.kind.as_str())]),
        )
        .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Value;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> HttpProvider {
        HttpProvider::new(&server.uri(), Some(String::from("secret"))).expect("client")
    }

    #[tokio::test]
    async fn test_create_sends_typed_body_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/resources"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "type": "subnet",
                "name": "a",
                "attributes": { "cidr_block": "10.0.1.0/24" }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "subnet-42",
                "outputs": { "id": "subnet-42", "arn": "arn:x" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut attrs = AttrMap::new();
        attrs.insert(String::from("cidr_block"), Value::from("10.0.1.0/24"));
        let created = provider(&server)
            .create(&ResourceId::new("subnet", "a"), &attrs)
            .await
            .expect("create");

        assert_eq!(created.provider_id, "subnet-42");
        assert_eq!(created.outputs.get("arn"), Some(&Value::from("arn:x")));
    }

    #[tokio::test]
    async fn test_update_returns_outputs() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/resources/sg-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "outputs": { "id": "sg-1" } })),
            )
            .mount(&server)
            .await;

        let outputs = provider(&server)
            .update(&ResourceId::new("security_group", "web"), "sg-1", &AttrMap::new())
            .await
            .expect("update");
        assert_eq!(outputs.get("id"), Some(&Value::from("sg-1")));
    }

    #[tokio::test]
    async fn test_throttling_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .create(&ResourceId::new("network", "main"), &AttrMap::new())
            .await
            .expect_err("throttled");
        assert_eq!(err.code, ProviderErrorCode::Throttled);
        assert_eq!(err.retry_after_secs, Some(7));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases: [(u16, ProviderErrorCode); 8] = [
            (400, ProviderErrorCode::InvalidInput),
            (422, ProviderErrorCode::InvalidInput),
            (401, ProviderErrorCode::PermissionDenied),
            (403, ProviderErrorCode::PermissionDenied),
            (402, ProviderErrorCode::QuotaExceeded),
            (404, ProviderErrorCode::NotFound),
            (409, ProviderErrorCode::Conflict),
            (503, ProviderErrorCode::Transient),
        ];

        for (status, expected) in cases {
            let server = MockServer::start().await;
            Mock::given(method("DELETE"))
                .and(path("/resources/vpc-1"))
                .respond_with(
                    ResponseTemplate::new(status).set_body_json(json!({ "message": "nope" })),
                )
                .mount(&server)
                .await;

            let err = provider(&server)
                .delete(&ResourceId::new("network", "main"), "vpc-1")
                .await
                .expect_err("error status");
            assert_eq!(err.code, expected, "status {status}");
            assert_eq!(err.message, "nope");
        }
    }

    #[tokio::test]
    async fn test_unreachable_plugin_is_transient() {
        let provider = HttpProvider::new("http://127.0.0.1:9", None).expect("client");
        let err = provider
            .delete(&ResourceId::new("network", "main"), "vpc-1")
            .await
            .expect_err("connection refused");
        assert_eq!(err.code, ProviderErrorCode::Transient);
    }
}
