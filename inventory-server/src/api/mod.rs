pub mod devices;
pub mod error;
pub mod groups;
pub mod internal;
pub mod models;

use std::convert::Infallible;

use axum::{
    Router,
    extract::FromRequestParts,
    http::{HeaderMap, StatusCode, request::Parts},
    routing::{get, patch, post},
};
use inventory_core::{DeviceId, TenantId};
use ulid::Ulid;

use crate::AppState;
use crate::context::OpContext;
use crate::store::{DataStore, TenantDataKeeper};
use error::ApiError;

pub const HEADER_TENANT_ID: &str = "x-tenant-id";
pub const HEADER_DEVICE_ID: &str = "x-device-id";
pub const HEADER_REQUEST_ID: &str = "x-request-id";
pub const HEADER_TOTAL_COUNT: &str = "x-total-count";
pub const HEADER_SOURCE: &str = "x-men-source";
pub const HEADER_MSG_TIMESTAMP: &str = "x-men-msg-timestamp";

pub fn router<S>() -> Router<AppState<S>>
where
    S: DataStore + TenantDataKeeper,
{
    Router::new()
        .nest("/api/management/v1/inventory", management_v1())
        .route(
            "/api/management/v2/inventory/devices",
            get(devices::list_devices_strict),
        )
        .route(
            "/api/devices/v1/inventory/device/attributes",
            patch(devices::device_upsert_attributes).put(devices::device_replace_attributes),
        )
        .nest("/api/internal/v1/inventory", internal_v1())
        .route(
            "/api/internal/v2/inventory/devices/{id}",
            patch(internal::patch_device_attributes),
        )
}

fn management_v1<S>() -> Router<AppState<S>>
where
    S: DataStore + TenantDataKeeper,
{
    Router::new()
        // Devices
        .route("/devices", get(devices::list_devices))
        .route(
            "/devices/{id}",
            get(devices::get_device).delete(devices::delete_device_inventory),
        )
        .route(
            "/devices/{id}/tags",
            patch(devices::update_tags).put(devices::replace_tags),
        )
        .route(
            "/devices/{id}/group",
            get(groups::get_device_group).put(groups::assign_device_group),
        )
        .route(
            "/devices/{id}/group/{name}",
            axum::routing::delete(groups::clear_device_group),
        )
        // Groups
        .route("/groups", get(groups::list_groups))
        .route(
            "/groups/{name}/devices",
            get(groups::list_group_devices)
                .patch(groups::add_group_devices)
                .delete(groups::remove_group_devices),
        )
}

fn internal_v1<S>() -> Router<AppState<S>>
where
    S: DataStore + TenantDataKeeper,
{
    Router::new()
        .route("/health", get(internal::health))
        .route("/alive", get(internal::alive))
        .route("/tenants", post(internal::create_tenant))
        .route("/tenants/{tenant}/devices", post(internal::add_device))
        .route(
            "/tenants/{tenant}/devices/{id}",
            axum::routing::delete(internal::delete_device),
        )
        .route(
            "/tenants/{tenant}/devices/status/{status}",
            post(internal::update_statuses),
        )
        .route(
            "/tenants/{tenant}/device/{id}/attribute/scope/{scope}",
            patch(internal::upsert_scope_attributes),
        )
        .route(
            "/tenants/{tenant}/devices/{id}/reindex",
            post(internal::reindex),
        )
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// Operation context of a request: tenant from `X-Tenant-ID` and request id
/// from `X-Request-ID`, generated when absent.
pub struct RequestContext(pub OpContext);

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant = header(&parts.headers, HEADER_TENANT_ID).map(TenantId::from);
        let request_id = header(&parts.headers, HEADER_REQUEST_ID)
            .map(str::to_string)
            .unwrap_or_else(|| Ulid::new().to_string());

        Ok(RequestContext(
            OpContext::new()
                .with_tenant(tenant)
                .with_request_id(request_id),
        ))
    }
}

/// Identity of the calling device, taken from `X-Device-ID`.
pub struct DeviceIdentity(pub DeviceId);

impl<S> FromRequestParts<S> for DeviceIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header(&parts.headers, HEADER_DEVICE_ID)
            .map(|id| DeviceIdentity(DeviceId::from(id)))
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing device identity"))
    }
}
