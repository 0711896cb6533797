use std::sync::Arc;

use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client as RedisClient};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::routes::group::model::Group;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct GroupMessage {
    pub message_id: String,
    pub group_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct MessageWithNickname {
    pub message_id: String,
    pub group_id: String,
    pub user_id: String,
    pub nickname: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    pub group_id: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct GetMessagesRequest {
    pub group_id: String,
    pub before_message_id: Option<String>,
    pub limit: Option<i64>,
}

// 最新一页消息的缓存
const MESSAGE_CACHE_EXPIRE: u64 = 300;
const MESSAGE_CACHE_PREFIX: &str = "msg:group:";

impl GroupMessage {
    pub async fn create(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        req: CreateMessageRequest,
        user_id: &str,
    ) -> Result<Self, AppError> {
        // 仅群组成员可以发言
        if !Group::is_member(pool, &req.group_id, user_id).await? {
            return Err(AppError::InvalidPayload("不是该群组成员，无法发言".to_string()));
        }

        let message = sqlx::query_as::<_, GroupMessage>(
            r#"
            INSERT INTO messages (message_id, group_id, user_id, content, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING message_id, group_id, user_id, content, created_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&req.group_id)
        .bind(user_id)
        .bind(&req.content)
        .fetch_one(pool)
        .await?;

        // 新消息写入后清除该群组的消息缓存
        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            let cache_key = format!("{}{}", MESSAGE_CACHE_PREFIX, req.group_id);
            let _: Result<(), redis::RedisError> = conn.del(&cache_key).await;
        }

        Ok(message)
    }

    pub async fn get_messages(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        req: GetMessagesRequest,
        user_id: &str,
    ) -> Result<Vec<MessageWithNickname>, AppError> {
        if !Group::is_member(pool, &req.group_id, user_id).await? {
            return Err(AppError::InvalidPayload("不是该群组成员".to_string()));
        }

        let limit = req.limit.unwrap_or(50).clamp(1, 100);

        // 最新一页走缓存
        if req.before_message_id.is_none() && limit <= 50 {
            let cache_key = format!("{}{}", MESSAGE_CACHE_PREFIX, req.group_id);

            if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
                let cached: redis::RedisResult<String> = conn.get(&cache_key).await;
                if let Ok(json_str) = cached {
                    if let Ok(messages) =
                        serde_json::from_str::<Vec<MessageWithNickname>>(&json_str)
                    {
                        tracing::debug!("Get messages from cache: {}", cache_key);
                        return Ok(messages);
                    }
                }
            }
        }

        let messages = match &req.before_message_id {
            Some(before) => {
                sqlx::query_as::<_, MessageWithNickname>(
                    r#"
                    SELECT m.message_id, m.group_id, m.user_id, u.nickname, m.content, m.created_at
                    FROM messages m
                    JOIN users u ON m.user_id = u.user_id
                    WHERE m.group_id = $1
                        AND m.created_at < (
                            SELECT created_at FROM messages WHERE message_id = $2
                        )
                    ORDER BY m.created_at DESC
                    LIMIT $3
                    "#,
                )
                .bind(&req.group_id)
                .bind(before)
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
            None => {
                let messages = sqlx::query_as::<_, MessageWithNickname>(
                    r#"
                    SELECT m.message_id, m.group_id, m.user_id, u.nickname, m.content, m.created_at
                    FROM messages m
                    JOIN users u ON m.user_id = u.user_id
                    WHERE m.group_id = $1
                    ORDER BY m.created_at DESC
                    LIMIT $2
                    "#,
                )
                .bind(&req.group_id)
                .bind(limit)
                .fetch_all(pool)
                .await?;

                if limit <= 50 {
                    if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
                        let cache_key = format!("{}{}", MESSAGE_CACHE_PREFIX, req.group_id);
                        if let Ok(json_str) = serde_json::to_string(&messages) {
                            let _: Result<(), redis::RedisError> =
                                conn.set_ex(&cache_key, json_str, MESSAGE_CACHE_EXPIRE).await;
                        }
                    }
                }

                messages
            }
        };

        Ok(messages)
    }
}
