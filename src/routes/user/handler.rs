use axum::{
    Extension,
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    AppState,
    middleware::CurrentUser,
    utils::{error_codes, error_to_api_response, generate_token, success_to_api_response},
};

use super::model::{
    CheckTokenResponse, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, User,
};

#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    // 检查用户ID格式
    if !req.user_id.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return (
            StatusCode::OK,
            error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "用户ID格式无效，只允许使用字母、数字和下划线".to_string(),
            ),
        );
    }

    match User::create(&state.pool, req).await {
        Ok(user) => match generate_token(&user.user_id, &state.config) {
            Ok((token, _)) => (
                StatusCode::OK,
                success_to_api_response(RegisterResponse {
                    user_id: user.user_id,
                    nickname: user.nickname,
                    token,
                }),
            ),
            Err(_) => (
                StatusCode::OK,
                error_to_api_response(error_codes::INTERNAL_ERROR, "生成令牌失败".to_string()),
            ),
        },
        Err(e) => {
            if e.to_string().contains("unique constraint") {
                (
                    StatusCode::OK,
                    error_to_api_response(error_codes::USER_EXISTS, "用户已存在".to_string()),
                )
            } else {
                tracing::error!("Failed to create user: {}", e);
                (
                    StatusCode::OK,
                    error_to_api_response(error_codes::INTERNAL_ERROR, "创建用户失败".to_string()),
                )
            }
        }
    }
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let user = match User::find_by_id(&state.pool, &req.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::OK,
                error_to_api_response(error_codes::NOT_FOUND, "用户不存在".to_string()),
            );
        }
        Err(_) => {
            return (
                StatusCode::OK,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            );
        }
    };

    match user.verify_login(&req.password) {
        Ok(true) => match generate_token(&user.user_id, &state.config) {
            Ok((token, _)) => (
                StatusCode::OK,
                success_to_api_response(LoginResponse {
                    user_id: user.user_id,
                    token,
                }),
            ),
            Err(_) => (
                StatusCode::OK,
                error_to_api_response(error_codes::INTERNAL_ERROR, "生成令牌失败".to_string()),
            ),
        },
        _ => (
            StatusCode::OK,
            error_to_api_response(error_codes::AUTH_FAILED, "用户名或密码错误".to_string()),
        ),
    }
}

#[axum::debug_handler]
pub async fn check_token(Extension(current): Extension<CurrentUser>) -> impl IntoResponse {
    (
        StatusCode::OK,
        success_to_api_response(CheckTokenResponse {
            user_id: current.user_id,
            role: current.role,
        }),
    )
}
