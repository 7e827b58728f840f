//! HTTP implementation of the cloud contract.
//!
//! # Example
//!
//! ```no_run
//! use fleetsync_core::{CloudClient, HttpCloudClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpCloudClient::new("https://cloud.example.com/api", "token")?;
//! let sensors = client.load_sensors().await?;
//! println!("{} sensors on the account", sensors.len());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use fleetsync_types::{MacId, QueuedRequest, Record, RequestKind};

use crate::cloud::{CloudClient, CloudSensor, CloudSensorAlerts, CloudSettings, DenseFilter, DenseSensor};
use crate::error::{CloudError, CloudResult};

/// Cloud client speaking JSON over HTTP with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpCloudClient {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    kind: RequestKind,
    idempotency_key: &'a str,
    mac_id: Option<&'a MacId>,
    payload: serde_json::Value,
}

impl HttpCloudClient {
    /// Create a client for the API rooted at `base_url`.
    pub fn new(base_url: &str, token: impl Into<String>) -> CloudResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(CloudError::Request)?;
        Self::with_client(base_url, token, client)
    }

    /// Create a client with a custom reqwest Client.
    pub fn with_client(base_url: &str, token: impl Into<String>, client: Client) -> CloudResult<Self> {
        // Normalize URL (remove trailing slash)
        let base_url = base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(CloudError::InvalidUrl(format!(
                "URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        Ok(Self {
            client,
            base_url,
            token: token.into(),
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, url: String, request: RequestBuilder) -> CloudResult<T> {
        let response = self.execute(url, request).await?;
        response.json().await.map_err(CloudError::Request)
    }

    async fn execute(&self, url: String, request: RequestBuilder) -> CloudResult<reqwest::Response> {
        debug!("Cloud request {}", url);
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| CloudError::NotReachable { url, source: e })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(CloudError::Unauthorized);
        }

        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or_else(|| status.to_string());

        Err(CloudError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

fn rfc3339(t: OffsetDateTime) -> CloudResult<String> {
    t.format(&Rfc3339)
        .map_err(|e| CloudError::Other(format!("Unformattable timestamp: {e}")))
}

#[async_trait]
impl CloudClient for HttpCloudClient {
    async fn load_sensors(&self) -> CloudResult<Vec<CloudSensor>> {
        let url = self.url("/sensors");
        self.send(url.clone(), self.client.get(&url)).await
    }

    async fn load_records(
        &self,
        mac_id: &MacId,
        since: OffsetDateTime,
        until: Option<OffsetDateTime>,
    ) -> CloudResult<Vec<Record>> {
        let url = self.url("/records");
        let mut query = vec![
            ("sensor", mac_id.to_string()),
            ("since", rfc3339(since)?),
        ];
        if let Some(until) = until {
            query.push(("until", rfc3339(until)?));
        }

        self.send(url.clone(), self.client.get(&url).query(&query))
            .await
    }

    async fn load_sensors_dense(&self, filter: DenseFilter) -> CloudResult<Vec<DenseSensor>> {
        let url = self.url("/sensors/dense");
        self.send(
            url.clone(),
            self.client.get(&url).query(&[("filter", filter.as_str())]),
        )
        .await
    }

    async fn get_settings(&self) -> CloudResult<CloudSettings> {
        let url = self.url("/settings");
        self.send(url.clone(), self.client.get(&url)).await
    }

    async fn load_alerts(&self) -> CloudResult<Vec<CloudSensorAlerts>> {
        let url = self.url("/alerts");
        self.send(url.clone(), self.client.get(&url)).await
    }

    async fn submit(&self, request: &QueuedRequest) -> CloudResult<()> {
        let url = self.url("/requests");
        let body = SubmitBody {
            kind: request.kind,
            idempotency_key: &request.idempotency_key,
            mac_id: request.mac_id.as_ref(),
            payload: serde_json::from_str(&request.payload)?,
        };

        self.execute(url.clone(), self.client.post(&url).json(&body))
            .await
            .map(|_| ())
    }
}
