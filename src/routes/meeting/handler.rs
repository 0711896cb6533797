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

use super::model::{CreateMeetingRequest, GroupMeeting, RespondMeetingInviteRequest};

#[derive(Debug, Deserialize)]
pub struct GroupQuery {
    pub group_id: String,
}

#[axum::debug_handler]
pub async fn create_meeting(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<CreateMeetingRequest>,
) -> Result<impl IntoResponse, AppError> {
    let created = GroupMeeting::create(&state.pool, &state.fanout, req, &current).await?;
    Ok((StatusCode::CREATED, success_to_api_response(created)))
}

#[axum::debug_handler]
pub async fn respond_meeting_invite(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<RespondMeetingInviteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invite = GroupMeeting::respond(&state.pool, &state.fanout, req, &current).await?;
    Ok((StatusCode::OK, success_to_api_response(invite)))
}

#[axum::debug_handler]
pub async fn group_meetings(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<GroupQuery>,
) -> Result<impl IntoResponse, AppError> {
    let meetings =
        GroupMeeting::find_by_group(&state.pool, &query.group_id, &current.user_id).await?;
    Ok((StatusCode::OK, success_to_api_response(meetings)))
}

#[axum::debug_handler]
pub async fn my_meeting_invites(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, AppError> {
    let invites = GroupMeeting::pending_invites_for_user(&state.pool, &current.user_id).await?;
    Ok((StatusCode::OK, success_to_api_response(invites)))
}
