use axum::{extract::Request, extract::State, middleware::Next, response::Response};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use serde::Serialize;

use crate::AppState;
use crate::error::AppError;
use crate::routes::user::model::User;
use crate::utils::verify_token;

/// 已认证的调用方身份，由中间件注入到请求扩展，
/// 工作流只消费这个不透明输入，不关心认证细节
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub user_id: String,
    pub nickname: String,
    pub email: String,
    pub role: String,
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    TypedHeader(bearer): TypedHeader<Authorization<Bearer>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims =
        verify_token(bearer.token(), &state.config).map_err(|_| AppError::Unauthorized)?;

    // token 有效但用户已删除时同样视为未授权
    let user = User::find_by_id(&state.pool, &claims.sub)
        .await?
        .ok_or(AppError::Unauthorized)?;

    request.extensions_mut().insert(CurrentUser {
        user_id: user.user_id,
        nickname: user.nickname,
        email: user.email,
        role: user.role,
    });

    Ok(next.run(request).await)
}
