use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use inventory_core::{DeviceId, GroupName};

use super::error::{ApiError, ForRequest};
use super::models::{GroupRequest, GroupResponse, PageParams, UpdateResponse};
use super::{HEADER_TOTAL_COUNT, RequestContext};
use crate::AppState;
use crate::store::filter::{DEFAULT_PER_PAGE, MAX_PER_PAGE, page_offset};
use crate::store::{DataStore, TenantDataKeeper};

pub async fn get_device_group<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Path(id): Path<String>,
) -> Result<Json<GroupResponse>, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let group = state
        .inventory
        .get_device_group(&ctx, &DeviceId::from(id))
        .await
        .for_request(&ctx)?;

    Ok(Json(GroupResponse { group }))
}

pub async fn assign_device_group<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Path(id): Path<String>,
    Json(request): Json<GroupRequest>,
) -> Result<StatusCode, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let group = GroupName::new(request.group).for_request(&ctx)?;

    state
        .inventory
        .update_device_group(&ctx, &DeviceId::from(id), &group)
        .await
        .for_request(&ctx)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_device_group<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Path((id, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let group = GroupName::new(name).for_request(&ctx)?;

    state
        .inventory
        .unset_device_group(&ctx, &DeviceId::from(id), &group)
        .await
        .for_request(&ctx)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_groups<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
) -> Result<Json<Vec<GroupName>>, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let groups = state.inventory.list_groups(&ctx).await.for_request(&ctx)?;
    Ok(Json(groups))
}

pub async fn list_group_devices<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Path(name): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Response, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let group = GroupName::new(name).for_request(&ctx)?;

    let page = params.page.unwrap_or(1);
    let per_page = params.per_page.unwrap_or(DEFAULT_PER_PAGE);
    if page == 0 {
        return Err(ApiError::bad_request("page must be a positive integer").with_request_id(&ctx));
    }
    if per_page == 0 || per_page > MAX_PER_PAGE {
        return Err(
            ApiError::bad_request(format!("per_page must be between 1 and {MAX_PER_PAGE}"))
                .with_request_id(&ctx),
        );
    }

    let (ids, total) = state
        .inventory
        .list_devices_by_group(&ctx, &group, page_offset(page, per_page), per_page)
        .await
        .for_request(&ctx)?;

    Ok(([(HEADER_TOTAL_COUNT, total.to_string())], Json(ids)).into_response())
}

pub async fn add_group_devices<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Path(name): Path<String>,
    Json(ids): Json<Vec<DeviceId>>,
) -> Result<Json<UpdateResponse>, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let group = GroupName::new(name).for_request(&ctx)?;

    let result = state
        .inventory
        .update_devices_group(&ctx, &ids, &group)
        .await
        .for_request(&ctx)?;

    Ok(Json(result.into()))
}

pub async fn remove_group_devices<S>(
    State(state): State<AppState<S>>,
    RequestContext(ctx): RequestContext,
    Path(name): Path<String>,
    Json(ids): Json<Vec<DeviceId>>,
) -> Result<Json<UpdateResponse>, ApiError>
where
    S: DataStore + TenantDataKeeper,
{
    let group = GroupName::new(name).for_request(&ctx)?;

    let result = state
        .inventory
        .unset_devices_group(&ctx, &ids, &group)
        .await
        .for_request(&ctx)?;

    Ok(Json(result.into()))
}
