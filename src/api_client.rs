//! HTTP client for the admin API, used by the manual-mode CLI.

use std::time::Duration;

use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::admin_api::{ApiResponse, HealthResponse, ScaleRequest};
use crate::error::{Result, ShardScaleError};
use crate::types::ScalingReport;

pub struct AdminApiClient {
    client: Client<HttpConnector>,
    base_url: String,
    timeout: Duration,
}

impl AdminApiClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .build_http();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            // plans wait for the stream to go ACTIVE between mutations, so
            // manual commands can legitimately take minutes
            timeout: Duration::from_secs(600),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(format!("{}/health", self.base_url))
            .body(Body::empty())
            .map_err(|e| ShardScaleError::AdminApi(e.to_string()))?;
        let body = self.execute(request).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn stream_report(&self, stream: &str) -> Result<ScalingReport> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(format!(
                "{}/api/v1/streams/{stream}/report",
                self.base_url
            ))
            .body(Body::empty())
            .map_err(|e| ShardScaleError::AdminApi(e.to_string()))?;
        let body = self.execute(request).await?;
        unwrap_response(serde_json::from_slice(&body)?)
    }

    pub async fn scale(&self, stream: &str, command: &ScaleRequest) -> Result<ScalingReport> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("{}/api/v1/streams/{stream}/scale", self.base_url))
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(command)?))
            .map_err(|e| ShardScaleError::AdminApi(e.to_string()))?;
        let body = self.execute(request).await?;
        unwrap_response(serde_json::from_slice(&body)?)
    }

    async fn execute(&self, request: Request<Body>) -> Result<Vec<u8>> {
        debug!(uri = %request.uri(), method = %request.method(), "admin API request");
        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| ShardScaleError::AdminApi("request timed out".to_string()))?
            .map_err(|e| ShardScaleError::AdminApi(e.to_string()))?;
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| ShardScaleError::AdminApi(e.to_string()))?;
        if status.is_server_error() && bytes.is_empty() {
            return Err(ShardScaleError::AdminApi(format!(
                "admin API returned {status}"
            )));
        }
        Ok(bytes.to_vec())
    }
}

fn unwrap_response<T: DeserializeOwned>(response: ApiResponse<T>) -> Result<T> {
    if response.success {
        response
            .data
            .ok_or_else(|| ShardScaleError::AdminApi("empty response body".to_string()))
    } else {
        Err(ShardScaleError::AdminApi(
            response
                .error
                .unwrap_or_else(|| "unknown error".to_string()),
        ))
    }
}
