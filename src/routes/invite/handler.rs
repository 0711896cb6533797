use axum::{
    Extension,
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::utils::success_to_api_response;

use super::model::{CreateInviteRequest, GroupInvite, RespondInviteRequest};

#[axum::debug_handler]
pub async fn create_invite(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<CreateInviteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invite = GroupInvite::create(&state.pool, &state.fanout, req, &current).await?;
    Ok((StatusCode::CREATED, success_to_api_response(invite)))
}

#[axum::debug_handler]
pub async fn respond_invite(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<RespondInviteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invite = GroupInvite::respond(&state.pool, &state.fanout, req, &current).await?;
    Ok((StatusCode::OK, success_to_api_response(invite)))
}

#[axum::debug_handler]
pub async fn my_invites(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, AppError> {
    let invites = GroupInvite::find_by_receiver(&state.pool, &current.user_id).await?;
    Ok((StatusCode::OK, success_to_api_response(invites)))
}
