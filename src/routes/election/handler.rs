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

use super::model::{
    Candidate, CastVoteRequest, CreateElectionRequest, CreatePositionRequest, Election,
    NominateRequest, Position, Vote,
};

#[derive(Debug, Deserialize)]
pub struct GroupQuery {
    pub group_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ElectionQuery {
    pub election_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PositionQuery {
    pub position_id: String,
}

#[derive(Debug, Deserialize)]
pub struct EndElectionRequest {
    pub election_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DeletePositionRequest {
    pub position_id: String,
}

#[axum::debug_handler]
pub async fn create_election(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<CreateElectionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let election = Election::create(&state.pool, &state.fanout, req, &current).await?;
    Ok((StatusCode::CREATED, success_to_api_response(election)))
}

#[axum::debug_handler]
pub async fn end_election(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<EndElectionRequest>,
) -> Result<impl IntoResponse, AppError> {
    Election::end(&state.pool, &state.fanout, &req.election_id, &current).await?;
    Ok((
        StatusCode::OK,
        success_to_api_response(serde_json::json!({ "success": true })),
    ))
}

#[axum::debug_handler]
pub async fn group_elections(
    State(state): State<AppState>,
    Query(query): Query<GroupQuery>,
) -> Result<impl IntoResponse, AppError> {
    let elections = Election::find_by_group(&state.pool, &query.group_id).await?;
    Ok((StatusCode::OK, success_to_api_response(elections)))
}

#[axum::debug_handler]
pub async fn create_position(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<CreatePositionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let position = Position::create(&state.pool, &state.fanout, req, &current).await?;
    Ok((StatusCode::CREATED, success_to_api_response(position)))
}

#[axum::debug_handler]
pub async fn delete_position(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<DeletePositionRequest>,
) -> Result<impl IntoResponse, AppError> {
    Position::delete(&state.pool, &state.fanout, &req.position_id, &current).await?;
    Ok((
        StatusCode::OK,
        success_to_api_response(serde_json::json!({ "success": true })),
    ))
}

#[axum::debug_handler]
pub async fn nominate_candidate(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<NominateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let candidate = Candidate::nominate(&state.pool, &state.fanout, req, &current).await?;
    Ok((StatusCode::CREATED, success_to_api_response(candidate)))
}

#[axum::debug_handler]
pub async fn position_candidates(
    State(state): State<AppState>,
    Query(query): Query<PositionQuery>,
) -> Result<impl IntoResponse, AppError> {
    let candidates = Candidate::find_by_position(&state.pool, &query.position_id).await?;
    Ok((StatusCode::OK, success_to_api_response(candidates)))
}

#[axum::debug_handler]
pub async fn cast_vote(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<CastVoteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let vote = Vote::cast(&state.pool, req, &current).await?;
    Ok((StatusCode::CREATED, success_to_api_response(vote)))
}

#[axum::debug_handler]
pub async fn tally_by_candidate(
    State(state): State<AppState>,
    Query(query): Query<ElectionQuery>,
) -> Result<impl IntoResponse, AppError> {
    let tallies = Vote::tally_by_candidate(&state.pool, &query.election_id).await?;
    Ok((StatusCode::OK, success_to_api_response(tallies)))
}

#[axum::debug_handler]
pub async fn tally_by_position(
    State(state): State<AppState>,
    Query(query): Query<ElectionQuery>,
) -> Result<impl IntoResponse, AppError> {
    let tallies = Vote::tally_by_position(&state.pool, &query.election_id).await?;
    Ok((StatusCode::OK, success_to_api_response(tallies)))
}
