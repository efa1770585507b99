use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use inventory_core::{DeviceId, Scope, UpdateResult};

use super::error::{ApiError, ForRequest};
use super::models::{AttributeRequest, DeviceResponse, into_attributes};
use super::{DeviceIdentity, HEADER_TOTAL_COUNT, RequestContext};
use crate::AppState;
use crate::context::OpContext;
use crate::inventory::Inventory;
use crate::query::QueryParser;
use crate::store::{DataStore, TenantDataKeeper};

async fn list_with<S>(
    inventory: &Inventory<S>,
    parser: &QueryParser,
    ctx: &OpContext,
    params: &[(String, String)],
) -> Result<Response, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let query = parser.parse_list_query(params).for_request(ctx)?;
    let (devices, total) = inventory.list_devices(ctx, &query).await.for_request(ctx)?;

    let devices: Vec<DeviceResponse> = devices.into_iter().map(DeviceResponse::from).collect();
    Ok(([(HEADER_TOTAL_COUNT, total.to_string())], Json(devices)).into_response())
}

/// Lists devices, unscoped filter keys address inventory attributes.
pub async fn list_devices<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    list_with(&state.inventory, &state.legacy_parser, &ctx, &params).await
}

/// Lists devices, every filter key must be `<scope>/<name>`.
pub async fn list_devices_strict<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    list_with(&state.inventory, &state.strict_parser, &ctx, &params).await
}

pub async fn get_device<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Path(id): Path<String>,
) -> Result<Response, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let device = state
        .inventory
        .get_device(&ctx, &DeviceId::from(id))
        .await
        .for_request(&ctx)?;

    let etag = device.tags_etag.clone();
    let body = Json(DeviceResponse::from(device));
    match etag {
        Some(etag) => Ok(([(header::ETAG, etag)], body).into_response()),
        None => Ok(body.into_response()),
    }
}

/// Clears the inventory scope of the device. Identity and tags survive.
pub async fn delete_device_inventory<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let id = DeviceId::from(id);
    state.inventory.get_device(&ctx, &id).await.for_request(&ctx)?;

    state
        .inventory
        .replace_attributes(&ctx, &id, Vec::new(), Scope::Inventory, None)
        .await
        .for_request(&ctx)?;

    Ok(StatusCode::NO_CONTENT)
}

fn if_match(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::IF_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

fn tags_response(result: UpdateResult) -> Response {
    let etag = result
        .devices
        .as_deref()
        .and_then(|devices| devices.first())
        .and_then(|device| device.tags_etag.clone());

    match etag {
        Some(etag) => (StatusCode::OK, [(header::ETAG, etag)]).into_response(),
        None => StatusCode::OK.into_response(),
    }
}

pub async fn replace_tags<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(tags): Json<Vec<AttributeRequest>>,
) -> Result<Response, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let result = state
        .inventory
        .replace_attributes(
            &ctx,
            &DeviceId::from(id),
            into_attributes(tags, Scope::Tags),
            Scope::Tags,
            if_match(&headers),
        )
        .await
        .for_request(&ctx)?;

    Ok(tags_response(result))
}

pub async fn update_tags<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(tags): Json<Vec<AttributeRequest>>,
) -> Result<Response, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let result = state
        .inventory
        .upsert_attributes_with_updated(
            &ctx,
            &DeviceId::from(id),
            into_attributes(tags, Scope::Tags),
            Scope::Tags,
            if_match(&headers),
        )
        .await
        .for_request(&ctx)?;

    Ok(tags_response(result))
}

/// Inventory report of a device, merged into what is stored.
pub async fn device_upsert_attributes<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    DeviceIdentity(id): DeviceIdentity,
    Json(attributes): Json<Vec<AttributeRequest>>,
) -> Result<StatusCode, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    state
        .inventory
        .upsert_attributes_with_updated(
            &ctx,
            &id,
            into_attributes(attributes, Scope::Inventory),
            Scope::Inventory,
            None,
        )
        .await
        .for_request(&ctx)?;

    Ok(StatusCode::OK)
}

/// Inventory report of a device, replacing what is stored.
pub async fn device_replace_attributes<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    DeviceIdentity(id): DeviceIdentity,
    Json(attributes): Json<Vec<AttributeRequest>>,
) -> Result<StatusCode, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    state
        .inventory
        .replace_attributes(
            &ctx,
            &id,
            into_attributes(attributes, Scope::Inventory),
            Scope::Inventory,
            None,
        )
        .await
        .for_request(&ctx)?;

    Ok(StatusCode::OK)
}
