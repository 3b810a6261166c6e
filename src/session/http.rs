//! `CloudSession` over a JSON provider gateway
//!
//! The gateway exposes the provider's list, metric, log and describe calls under `/v1`
//! and handles signing. This session only maps HTTP outcomes onto `ProviderError`.

use crate::error::ProviderError;
use crate::model::{ResourceRef, ResourceType};
use crate::session::{BoxFuture, CloudSession, DataPoint, LogLine, LogQuery, MetricQuery};
use log::debug;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ListResponse {
    identifiers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SourcesResponse {
    sources: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MetricResponse {
    datapoints: Vec<DataPoint>,
}

#[derive(Debug, Deserialize)]
struct LogsResponse {
    lines: Vec<LogLine>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: Option<String>,
}

/// Session talking to a provider gateway over HTTP
pub struct HttpSession {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpSession {
    /// Create a session for the gateway at `base_url`
    ///
    /// # Arguments
    ///
    /// * `base_url` - Gateway root, e.g. `http://localhost:8080`
    /// * `token` - Bearer token sent with every request, if any
    /// * `timeout` - Per-request timeout
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cloudeyes/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ProviderError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            debug!("Gateway returned {}: {}", status, body);
            return Err(classify_status(status, body));
        }

        response.json::<T>().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse gateway response: {}", e))
        })
    }
}

fn classify_status(status: StatusCode, body: String) -> ProviderError {
    let detail = format!("{}: {}", status, body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::Throttled(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized(detail),
        StatusCode::NOT_FOUND => ProviderError::NotFound(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout,
        s if s.is_server_error() => ProviderError::Network(detail),
        _ => ProviderError::InvalidResponse(detail),
    }
}

impl CloudSession for HttpSession {
    fn list_resources<'a>(
        &'a self,
        resource_type: ResourceType,
        region: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ProviderError>> {
        Box::pin(async move {
            let request = self
                .client
                .get(self.url(&format!("resources/{}", resource_type.as_str())))
                .query(&[("region", region)]);
            let response: ListResponse = self.send(request).await?;
            Ok(response.identifiers)
        })
    }

    fn log_sources<'a>(
        &'a self,
        resource: &'a ResourceRef,
    ) -> BoxFuture<'a, Result<Vec<String>, ProviderError>> {
        Box::pin(async move {
            let request = self.client.get(self.url("log-sources")).query(&[
                ("type", resource.resource_type.as_str()),
                ("identifier", resource.identifier.as_str()),
                ("region", resource.region.as_str()),
            ]);
            let response: SourcesResponse = self.send(request).await?;
            Ok(response.sources)
        })
    }

    fn fetch_metric<'a>(
        &'a self,
        query: &'a MetricQuery,
    ) -> BoxFuture<'a, Result<Vec<DataPoint>, ProviderError>> {
        Box::pin(async move {
            let request = self.client.post(self.url("metrics")).json(query);
            let response: MetricResponse = self.send(request).await?;
            Ok(response.datapoints)
        })
    }

    fn fetch_logs<'a>(
        &'a self,
        query: &'a LogQuery,
    ) -> BoxFuture<'a, Result<Vec<LogLine>, ProviderError>> {
        Box::pin(async move {
            let request = self.client.post(self.url("logs")).json(query);
            let response: LogsResponse = self.send(request).await?;
            Ok(response.lines)
        })
    }

    fn describe_status<'a>(
        &'a self,
        resource: &'a ResourceRef,
    ) -> BoxFuture<'a, Result<Option<String>, ProviderError>> {
        Box::pin(async move {
            let request = self.client.get(self.url("status")).query(&[
                ("type", resource.resource_type.as_str()),
                ("identifier", resource.identifier.as_str()),
                ("region", resource.region.as_str()),
            ]);
            let response: StatusResponse = self.send(request).await?;
            Ok(response.status)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Statistic;
    use chrono::{TimeZone, Utc};
    use httpmock::prelude::*;
    use serde_json::json;

    fn create_test_session(server: &MockServer, token: Option<&str>) -> HttpSession {
        HttpSession::new(
            server.base_url(),
            token.map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_resources() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/resources/database")
                    .query_param("region", "us-east-2")
                    .header("authorization", "Bearer secret");
                then.status(200)
                    .json_body(json!({"identifiers": ["orders-db", "users-db"]}));
            })
            .await;

        let session = create_test_session(&server, Some("secret"));
        let identifiers = session
            .list_resources(ResourceType::Database, "us-east-2")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(identifiers, vec!["orders-db", "users-db"]);
    }

    #[tokio::test]
    async fn test_fetch_metric() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/metrics");
                then.status(200).json_body(json!({
                    "datapoints": [
                        {"timestamp": "2024-01-01T00:05:00Z", "value": 91.5, "unit": "Percent"}
                    ]
                }));
            })
            .await;

        let session = create_test_session(&server, None);
        let query = MetricQuery {
            namespace: "AWS/RDS".to_string(),
            metric_name: "CPUUtilization".to_string(),
            dimensions: vec![("DBInstanceIdentifier".to_string(), "orders-db".to_string())],
            statistic: Statistic::Average,
            period_seconds: 300,
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap(),
            region: "us-east-2".to_string(),
        };

        let points = session.fetch_metric(&query).await.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 91.5);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/resources/cache");
                then.status(429).body("slow down");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/resources/firewall");
                then.status(403).body("denied");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/resources/stack");
                then.status(503);
            })
            .await;

        let session = create_test_session(&server, None);
        assert!(matches!(
            session.list_resources(ResourceType::Cache, "us-east-2").await,
            Err(ProviderError::Throttled(_))
        ));
        assert!(matches!(
            session.list_resources(ResourceType::Firewall, "us-east-2").await,
            Err(ProviderError::Unauthorized(_))
        ));
        assert!(matches!(
            session.list_resources(ResourceType::Stack, "us-east-2").await,
            Err(ProviderError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/status");
                then.status(200).body("<html>");
            })
            .await;

        let session = create_test_session(&server, None);
        let resource = ResourceRef::new(ResourceType::Stack, "network", "us-east-2");
        assert!(matches!(
            session.describe_status(&resource).await,
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::GATEWAY_TIMEOUT, String::new()),
            ProviderError::Timeout
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, String::new()),
            ProviderError::InvalidResponse(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, String::new()),
            ProviderError::NotFound(_)
        ));
    }
}
