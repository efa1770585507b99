//! Routes called by other services. The tenant is part of the path.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use inventory_core::{Attribute, AttributeSource, Device, DeviceId, DeviceUpdate, Scope, TenantId};
use tracing::info;

use super::{HEADER_MSG_TIMESTAMP, HEADER_SOURCE, RequestContext, header};
use super::error::{ApiError, ForRequest};
use super::models::{
    AttributeRequest, NewDeviceRequest, NewTenantRequest, ReindexParams, SourcePatchParams,
    UpdateResponse, into_attributes,
};
use crate::AppState;
use crate::context::OpContext;
use crate::store::{DataStore, TenantDataKeeper};

const SERVICE_DEVICEMONITOR: &str = "devicemonitor";

fn for_tenant(ctx: OpContext, tenant: &str) -> OpContext {
    ctx.with_tenant(Some(TenantId::from(tenant)))
}

pub async fn health<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
) -> Result<StatusCode, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    state.inventory.health_check(&ctx).await.for_request(&ctx)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn alive() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn create_tenant<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Json(request): Json<NewTenantRequest>,
) -> Result<StatusCode, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let ctx = for_tenant(ctx, request.tenant_id.as_str());

    state
        .inventory
        .create_tenant(&ctx, &request.tenant_id)
        .await
        .for_request(&ctx)?;

    Ok(StatusCode::CREATED)
}

pub async fn add_device<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Path(tenant): Path<String>,
    Json(request): Json<NewDeviceRequest>,
) -> Result<StatusCode, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let ctx = for_tenant(ctx, &tenant);

    let mut device = Device::new(request.id, jiff::Timestamp::now());
    device.attributes = request.attributes.into();

    state.inventory.add_device(&ctx, device).await.for_request(&ctx)?;
    Ok(StatusCode::CREATED)
}

pub async fn delete_device<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Path((tenant, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let ctx = for_tenant(ctx, &tenant);

    state
        .inventory
        .delete_device(&ctx, &DeviceId::from(id))
        .await
        .for_request(&ctx)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_statuses<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Path((tenant, status)): Path<(String, String)>,
    Json(updates): Json<Vec<DeviceUpdate>>,
) -> Result<Json<UpdateResponse>, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let ctx = for_tenant(ctx, &tenant);

    let result = state
        .inventory
        .upsert_devices_statuses(&ctx, &updates, &status)
        .await
        .for_request(&ctx)?;

    Ok(Json(result.into()))
}

pub async fn upsert_scope_attributes<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Path((tenant, id, scope)): Path<(String, String, String)>,
    Json(attributes): Json<Vec<AttributeRequest>>,
) -> Result<StatusCode, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let ctx = for_tenant(ctx, &tenant);
    let scope = scope.parse::<Scope>().for_request(&ctx)?;

    state
        .inventory
        .upsert_attributes_with_updated(
            &ctx,
            &DeviceId::from(id),
            into_attributes(attributes, scope),
            scope,
            None,
        )
        .await
        .for_request(&ctx)?;

    Ok(StatusCode::OK)
}

/// Attribute patch published by another service. `X-MEN-Source` names the
/// service and `X-MEN-Msg-Timestamp` carries the message time in Unix
/// milliseconds; patches older than the last one seen from the source are
/// rejected with 412.
pub async fn patch_device_attributes<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Path(id): Path<String>,
    Query(params): Query<SourcePatchParams>,
    headers: HeaderMap,
    Json(attributes): Json<Vec<Attribute>>,
) -> Result<StatusCode, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let ctx = match params.tenant_id.as_deref() {
        Some(tenant) if !tenant.is_empty() => for_tenant(ctx, tenant),
        _ => ctx,
    };

    let timestamp = header(&headers, HEADER_MSG_TIMESTAMP)
        .ok_or_else(|| ApiError::bad_request("required X-MEN-Msg-Timestamp header missing"))
        .and_then(|value| {
            value.parse::<u64>().map_err(|_| {
                ApiError::bad_request(
                    "X-MEN-Msg-Timestamp header invalid (UNIX timestamp with milliseconds expected)",
                )
            })
        })
        .for_request(&ctx)?;

    let name = header(&headers, HEADER_SOURCE)
        .ok_or_else(|| ApiError::bad_request("required X-MEN-Source header is missing"))
        .for_request(&ctx)?;

    let source = AttributeSource {
        name: name.to_string(),
        timestamp,
    };

    state
        .inventory
        .upsert_attributes_with_source(&ctx, &DeviceId::from(id), attributes, source)
        .await
        .for_request(&ctx)?;

    Ok(StatusCode::OK)
}

/// Without `service` the full-text projection is rebuilt, with
/// `service=devicemonitor` the alert flag is refreshed.
pub async fn reindex<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Path((tenant, id)): Path<(String, String)>,
    Query(params): Query<ReindexParams>,
) -> Result<StatusCode, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let ctx = for_tenant(ctx, &tenant);
    let id = DeviceId::from(id);

    match params.service.as_deref() {
        None => {
            state.inventory.reindex_text(&ctx, &id).await.for_request(&ctx)?;
        }
        Some(SERVICE_DEVICEMONITOR) => {
            let alerts = state
                .inventory
                .check_monitor_alerts(&ctx, &id)
                .await
                .for_request(&ctx)?;
            info!(device_id = %id, alerts, "device alerts refreshed");
        }
        Some(other) => {
            return Err(
                ApiError::bad_request(format!("unsupported service: {other}"))
                    .with_request_id(&ctx),
            );
        }
    }

    Ok(StatusCode::ACCEPTED)
}
