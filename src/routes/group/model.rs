use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CurrentUser;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub group_id: String,
    pub name: String,
    pub description: String,
    pub creator_id: String,
    pub created_at: DateTime<Utc>,
}

/// 成员快照行，兼作通知和邮件的收件人来源
#[derive(Debug, Serialize, FromRow)]
pub struct MemberInfo {
    pub user_id: String,
    pub nickname: String,
    pub email: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub description: Option<String>,
}

impl Group {
    /// 创建群组，创建者在同一事务内自动入群
    pub async fn create(
        pool: &PgPool,
        req: CreateGroupRequest,
        creator: &CurrentUser,
    ) -> Result<Self, AppError> {
        let group_id = Uuid::new_v4().to_string();
        let description = req.description.unwrap_or_default();

        let mut tx = pool.begin().await?;

        let group = sqlx::query_as::<_, Group>(
            r#"
            INSERT INTO groups (group_id, name, description, creator_id, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING group_id, name, description, creator_id, created_at
            "#,
        )
        .bind(&group_id)
        .bind(&req.name)
        .bind(&description)
        .bind(&creator.user_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO group_members (group_id, user_id, joined_at)
            VALUES ($1, $2, NOW())
            "#,
        )
        .bind(&group_id)
        .bind(&creator.user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(group)
    }

    pub async fn find_by_id(pool: &PgPool, group_id: &str) -> Result<Option<Self>, sqlx::Error> {
        let group = sqlx::query_as::<_, Group>(
            r#"
            SELECT group_id, name, description, creator_id, created_at
            FROM groups
            WHERE group_id = $1
            "#,
        )
        .bind(group_id)
        .fetch_optional(pool)
        .await?;

        Ok(group)
    }

    pub async fn find_by_user(pool: &PgPool, user_id: &str) -> Result<Vec<Self>, sqlx::Error> {
        let groups = sqlx::query_as::<_, Group>(
            r#"
            SELECT g.group_id, g.name, g.description, g.creator_id, g.created_at
            FROM groups g
            JOIN group_members gm ON g.group_id = gm.group_id
            WHERE gm.user_id = $1
            ORDER BY gm.joined_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(groups)
    }

    /// 当前成员快照。会议创建时的受邀人、通知和邮件收件人
    /// 都来自同一次查询结果
    pub async fn members(pool: &PgPool, group_id: &str) -> Result<Vec<MemberInfo>, sqlx::Error> {
        let members = sqlx::query_as::<_, MemberInfo>(
            r#"
            SELECT gm.user_id, u.nickname, u.email, gm.joined_at
            FROM group_members gm
            JOIN users u ON gm.user_id = u.user_id
            WHERE gm.group_id = $1
            ORDER BY gm.joined_at
            "#,
        )
        .bind(group_id)
        .fetch_all(pool)
        .await?;

        Ok(members)
    }

    /// 成员检查，可在事务内执行
    pub async fn is_member<'e, E>(exec: E, group_id: &str, user_id: &str) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM group_members
                WHERE group_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_one(exec)
        .await?;

        Ok(exists)
    }

    pub async fn leave(pool: &PgPool, group_id: &str, user_id: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM group_members
            WHERE group_id = $1 AND user_id = $2
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("不在该群组中".to_string()));
        }

        Ok(())
    }

    /// 删除群组，成员/邀请/消息/会议/选举随外键级联删除
    pub async fn delete(pool: &PgPool, group_id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM groups WHERE group_id = $1")
            .bind(group_id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("群组不存在".to_string()));
        }

        tracing::info!("Group {} deleted", group_id);
        Ok(())
    }
}
