use std::future::Future;
use std::time::Duration;

use inventory_core::TenantId;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-request context threaded through every store and client call.
///
/// Carries the tenant the request acts on, an optional request id for log
/// correlation, the caller's cancellation token and an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    tenant: Option<TenantId>,
    request_id: Option<String>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant(mut self, tenant: Option<TenantId>) -> Self {
        self.tenant = tenant;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Same context with the deadline moved up to at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let bounded = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < bounded => existing,
            _ => bounded,
        };

        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    pub fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drives `fut` until it completes, the token fires or the deadline
    /// passes, whichever comes first. An interrupted future is dropped.
    pub async fn run<F, T, E>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<Interrupted>,
    {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled.into());
        }

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled.into()),
            _ = deadline => Err(Interrupted::DeadlineExceeded.into()),
            result = fut => result,
        }
    }
}
