use async_trait::async_trait;
use inventory_core::DeviceId;
use serde::{Deserialize, Serialize};

use super::{ClientError, HEALTH_URI, bounded, join_url};
use crate::context::OpContext;

pub const REINDEX_URI: &str = "/api/v1/workflow/reindex_reporting";
pub const REINDEX_BATCH_URI: &str = "/api/v1/workflow/reindex_reporting_batch";

const SERVICE: &str = "workflows";
const SERVICE_INVENTORY: &str = "inventory";

/// Payload asking the reporting service to reindex one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexWorkflow {
    pub request_id: String,
    pub tenant_id: String,
    pub device_id: String,
    pub service: String,
}

#[async_trait]
pub trait WorkflowsClient: Send + Sync {
    async fn check_health(&self, ctx: &OpContext) -> Result<(), ClientError>;

    /// Starts the reporting reindex workflow for `ids`.
    async fn start_reindex(&self, ctx: &OpContext, ids: &[DeviceId]) -> Result<(), ClientError>;
}

#[derive(Debug, Clone)]
pub struct HttpWorkflowsClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpWorkflowsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            http,
        }
    }
}

#[async_trait]
impl WorkflowsClient for HttpWorkflowsClient {
    async fn check_health(&self, ctx: &OpContext) -> Result<(), ClientError> {
        let ctx = bounded(ctx);
        ctx.run(async {
            let response = self
                .http
                .get(join_url(&self.base_url, HEALTH_URI))
                .send()
                .await
                .map_err(ClientError::http(SERVICE))?;

            if !response.status().is_success() {
                return Err(ClientError::UnexpectedStatus {
                    service: SERVICE,
                    status: response.status(),
                });
            }
            Ok(())
        })
        .await
    }

    async fn start_reindex(&self, ctx: &OpContext, ids: &[DeviceId]) -> Result<(), ClientError> {
        if ids.is_empty() {
            return Ok(());
        }

        let tenant = ctx
            .tenant()
            .filter(|tenant| !tenant.as_str().is_empty())
            .ok_or(ClientError::MissingTenant)?;

        let workflows: Vec<ReindexWorkflow> = ids
            .iter()
            .map(|id| ReindexWorkflow {
                request_id: ctx.request_id().unwrap_or_default().to_string(),
                tenant_id: tenant.to_string(),
                device_id: id.to_string(),
                service: SERVICE_INVENTORY.to_string(),
            })
            .collect();

        let (workflow, request) = match workflows.as_slice() {
            [single] => (
                "reindex_reporting",
                self.http
                    .post(join_url(&self.base_url, REINDEX_URI))
                    .json(single),
            ),
            batch => (
                "reindex_reporting_batch",
                self.http
                    .post(join_url(&self.base_url, REINDEX_BATCH_URI))
                    .json(batch),
            ),
        };

        let ctx = bounded(ctx);
        ctx.run(async {
            let response = request.send().await.map_err(ClientError::http(SERVICE))?;
            let status = response.status();

            if status.as_u16() < 300 {
                Ok(())
            } else if status == reqwest::StatusCode::NOT_FOUND {
                Err(ClientError::WorkflowNotDefined(workflow))
            } else {
                Err(ClientError::UnexpectedStatus {
                    service: SERVICE,
                    status,
                })
            }
        })
        .await
    }
}
