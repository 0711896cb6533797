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

use super::model::{CreateMessageRequest, GetMessagesRequest, GroupMessage};

#[axum::debug_handler]
pub async fn create_message(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<impl IntoResponse, AppError> {
    let message =
        GroupMessage::create(&state.pool, &state.redis, req, &current.user_id).await?;
    Ok((StatusCode::CREATED, success_to_api_response(message)))
}

#[axum::debug_handler]
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<GetMessagesRequest>,
) -> Result<impl IntoResponse, AppError> {
    let messages =
        GroupMessage::get_messages(&state.pool, &state.redis, req, &current.user_id).await?;
    Ok((StatusCode::OK, success_to_api_response(messages)))
}
