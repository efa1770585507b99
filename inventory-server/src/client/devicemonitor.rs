use async_trait::async_trait;
use inventory_core::DeviceId;

use super::{ClientError, bounded};
use crate::context::OpContext;

const SERVICE: &str = "devicemonitor";

#[async_trait]
pub trait DeviceMonitorClient: Send + Sync {
    /// Number of latest alerts raised for the device.
    async fn check_alerts(&self, ctx: &OpContext, id: &DeviceId) -> Result<usize, ClientError>;
}

#[derive(Debug, Clone)]
pub struct HttpDeviceMonitorClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpDeviceMonitorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            http,
        }
    }

    /// Path segments are percent-encoded, so ids may hold any character.
    fn alerts_url(&self, tenant: &str, id: &DeviceId) -> Result<reqwest::Url, ClientError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|err| ClientError::InvalidUrl(format!("{}: {err}", self.base_url)))?;

        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["api", "v1", "devicemonitor", "tenants", tenant])
            .extend(["devices", id.as_str(), "alerts", "latest"]);

        Ok(url)
    }
}

#[async_trait]
impl DeviceMonitorClient for HttpDeviceMonitorClient {
    async fn check_alerts(&self, ctx: &OpContext, id: &DeviceId) -> Result<usize, ClientError> {
        let tenant = ctx.tenant().map(|t| t.as_str()).unwrap_or_default();
        let url = self.alerts_url(tenant, id)?;

        let ctx = bounded(ctx);
        ctx.run(async {
            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(ClientError::http(SERVICE))?;

            if response.status() != reqwest::StatusCode::OK {
                return Err(ClientError::UnexpectedStatus {
                    service: SERVICE,
                    status: response.status(),
                });
            }

            let alerts: Vec<serde_json::Value> =
                response.json().await.map_err(ClientError::http(SERVICE))?;
            Ok(alerts.len())
        })
        .await
    }
}
