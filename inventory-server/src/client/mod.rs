//! HTTP clients of the services the inventory reports to.

pub mod devicemonitor;
pub mod workflows;

use std::time::Duration;

pub use devicemonitor::{DeviceMonitorClient, HttpDeviceMonitorClient};
pub use workflows::{HttpWorkflowsClient, WorkflowsClient};

use crate::context::{Interrupted, OpContext};

/// Applied to calls whose context carries no deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub const HEALTH_URI: &str = "/api/v1/health";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{service}: request failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service}: unexpected HTTP status: {status}")]
    UnexpectedStatus {
        service: &'static str,
        status: reqwest::StatusCode,
    },
    #[error("invalid service URL: {0}")]
    InvalidUrl(String),
    #[error("workflows: context lacking tenant identity")]
    MissingTenant,
    #[error("workflows: workflow \"{0}\" not defined")]
    WorkflowNotDefined(&'static str),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl ClientError {
    fn http(service: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| ClientError::Http { service, source }
    }
}

fn bounded(ctx: &OpContext) -> OpContext {
    match ctx.deadline() {
        Some(_) => ctx.clone(),
        None => ctx.with_timeout(DEFAULT_TIMEOUT),
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://wf/", "/api/v1/health"), "http://wf/api/v1/health");
        assert_eq!(join_url("http://wf", "api/v1/health"), "http://wf/api/v1/health");
    }

    #[test]
    fn test_bounded_keeps_caller_deadline() {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(50);
        let ctx = OpContext::new().with_deadline(deadline);
        assert_eq!(bounded(&ctx).deadline(), Some(deadline));

        assert!(bounded(&OpContext::new()).deadline().is_some());
    }
}
