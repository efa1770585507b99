use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use inventory_core::ValidationError;
use serde::Serialize;
use tracing::error;

use crate::context::OpContext;
use crate::inventory::{ErrorKind, InventoryError};
use crate::query::QueryError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            request_id: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn with_request_id(mut self, ctx: &OpContext) -> Self {
        self.request_id = ctx.request_id().map(str::to_string);
        self
    }
}

/// Converts a handler error into an [`ApiError`] tagged with the request id.
pub trait ForRequest<T> {
    fn for_request(self, ctx: &OpContext) -> Result<T, ApiError>;
}

impl<T, E> ForRequest<T> for Result<T, E>
where
    E: Into<ApiError>,
{
    fn for_request(self, ctx: &OpContext) -> Result<T, ApiError> {
        self.map_err(|err| Into::<ApiError>::into(err).with_request_id(ctx))
    }
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        let status = match err.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => {
                error!(error = %err, "request failed");
                return ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
            }
        };

        ApiError::new(status, err.to_string())
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            request_id: self.request_id,
        };

        (self.status, Json(body)).into_response()
    }
}
