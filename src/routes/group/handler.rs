use axum::{
    Extension,
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::utils::success_to_api_response;

use super::model::{CreateGroupRequest, Group};

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub group_id: String,
}

#[axum::debug_handler]
pub async fn create_group(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let group = Group::create(&state.pool, req, &current).await?;
    Ok((StatusCode::CREATED, success_to_api_response(group)))
}

#[axum::debug_handler]
pub async fn find_by_id(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> Result<impl IntoResponse, AppError> {
    let group = Group::find_by_id(&state.pool, &query.group_id)
        .await?
        .ok_or_else(|| AppError::NotFound("群组不存在".to_string()))?;

    Ok((StatusCode::OK, success_to_api_response(group)))
}

#[axum::debug_handler]
pub async fn my_groups(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, AppError> {
    let groups = Group::find_by_user(&state.pool, &current.user_id).await?;
    Ok((StatusCode::OK, success_to_api_response(groups)))
}

#[axum::debug_handler]
pub async fn group_members(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> Result<impl IntoResponse, AppError> {
    if Group::find_by_id(&state.pool, &query.group_id).await?.is_none() {
        return Err(AppError::NotFound("群组不存在".to_string()));
    }

    let members = Group::members(&state.pool, &query.group_id).await?;
    Ok((StatusCode::OK, success_to_api_response(members)))
}

#[axum::debug_handler]
pub async fn leave_group(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<IdQuery>,
) -> Result<impl IntoResponse, AppError> {
    Group::leave(&state.pool, &req.group_id, &current.user_id).await?;
    Ok((
        StatusCode::OK,
        success_to_api_response(serde_json::json!({ "success": true })),
    ))
}

#[axum::debug_handler]
pub async fn delete_group(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<IdQuery>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!("User {} deleting group {}", current.user_id, req.group_id);
    Group::delete(&state.pool, &req.group_id).await?;
    Ok((
        StatusCode::OK,
        success_to_api_response(serde_json::json!({ "success": true })),
    ))
}
