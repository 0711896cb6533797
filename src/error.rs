use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::utils::{error_codes, error_to_api_response};

/// 业务错误分类，所有工作流返回 Result<_, AppError>
#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invite not found or already resolved")]
    NotFoundOrAlreadyResolved,
    #[error("unauthorized")]
    Unauthorized,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    /// 唯一约束冲突(23505)转为 Conflict，其余原样包装
    pub fn conflict_on_unique(err: sqlx::Error, msg: &str) -> AppError {
        if is_db_code(&err, "23505") {
            return AppError::Conflict(msg.to_string());
        }
        AppError::Database(err)
    }

    /// 外键约束冲突(23503)转为 InvalidPayload，其余原样包装
    pub fn invalid_on_fk(err: sqlx::Error, msg: &str) -> AppError {
        if is_db_code(&err, "23503") {
            return AppError::InvalidPayload(msg.to_string());
        }
        AppError::Database(err)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingFields(_) | AppError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::NotFoundOrAlreadyResolved => StatusCode::CONFLICT,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            AppError::MissingFields(_) | AppError::InvalidPayload(_) => {
                error_codes::VALIDATION_ERROR
            }
            AppError::NotFound(_) => error_codes::NOT_FOUND,
            AppError::Conflict(_) => error_codes::CONFLICT,
            AppError::NotFoundOrAlreadyResolved => error_codes::ALREADY_RESOLVED,
            AppError::Unauthorized => error_codes::AUTH_FAILED,
            AppError::Database(_) => error_codes::INTERNAL_ERROR,
        }
    }
}

fn is_db_code(err: &sqlx::Error, code: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(code),
        _ => false,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let msg = match &self {
            AppError::MissingFields(fields) => format!("缺少必填字段: {}", fields.join(", ")),
            AppError::InvalidPayload(msg) => msg.clone(),
            AppError::NotFound(msg) => msg.clone(),
            AppError::Conflict(msg) => msg.clone(),
            AppError::NotFoundOrAlreadyResolved => "邀请不存在或已处理".to_string(),
            AppError::Unauthorized => "未授权访问".to_string(),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "内部服务器错误".to_string()
            }
        };

        let body: Json<_> = error_to_api_response::<()>(self.code(), msg);
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(
            AppError::MissingFields(vec!["location"]).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::InvalidPayload("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Conflict("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::NotFoundOrAlreadyResolved.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(AppError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Database(sqlx::Error::RowNotFound).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn missing_fields_lists_names() {
        let err = AppError::MissingFields(vec!["location", "time_from"]);
        assert!(err.to_string().contains("location, time_from"));
    }

    #[test]
    fn non_constraint_errors_stay_database_errors() {
        let err = AppError::conflict_on_unique(sqlx::Error::RowNotFound, "duplicate");
        assert!(matches!(err, AppError::Database(_)));

        let err = AppError::invalid_on_fk(sqlx::Error::RowNotFound, "missing ref");
        assert!(matches!(err, AppError::Database(_)));
    }

    #[test]
    fn error_codes_are_distinct_per_variant() {
        assert_eq!(
            AppError::NotFoundOrAlreadyResolved.code(),
            error_codes::ALREADY_RESOLVED
        );
        assert_ne!(
            AppError::Conflict("x".into()).code(),
            AppError::NotFound("x".into()).code()
        );
    }
}
