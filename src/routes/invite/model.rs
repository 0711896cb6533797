use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::notify::{Fanout, NotificationKind, NotificationRefs};
use crate::routes::group::model::Group;
use crate::routes::user::model::User;

/// 邀请状态机: pending -> accepted | declined，终态不可再变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteStatus {
    Pending,
    Accepted,
    Declined,
}

impl InviteStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InviteStatus::Pending),
            "accepted" => Some(InviteStatus::Accepted),
            "declined" => Some(InviteStatus::Declined),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Pending => "pending",
            InviteStatus::Accepted => "accepted",
            InviteStatus::Declined => "declined",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, InviteStatus::Pending)
    }
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct GroupInvite {
    pub invite_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub group_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

/// 列表展示用，带群组名和邀请人昵称
#[derive(Debug, Serialize, FromRow)]
pub struct InviteDetail {
    pub invite_id: String,
    pub sender_id: String,
    pub sender_nickname: String,
    pub group_id: String,
    pub group_name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateInviteRequest {
    pub receiver_id: String,
    pub group_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RespondInviteRequest {
    pub invite_id: String,
    pub status: String,
}

impl GroupInvite {
    /// 创建群组邀请。同一 (受邀人, 群组) 允许存在多条 pending 记录，
    /// 拒绝后可以再次邀请
    pub async fn create(
        pool: &PgPool,
        fanout: &Fanout,
        req: CreateInviteRequest,
        sender: &CurrentUser,
    ) -> Result<Self, AppError> {
        // 校验受邀人和群组存在
        let receiver = User::find_by_id(pool, &req.receiver_id)
            .await?
            .ok_or_else(|| AppError::InvalidPayload("受邀用户不存在".to_string()))?;
        let group = Group::find_by_id(pool, &req.group_id)
            .await?
            .ok_or_else(|| AppError::InvalidPayload("群组不存在".to_string()))?;

        let invite_id = Uuid::new_v4().to_string();

        let mut tx = pool.begin().await?;

        let invite = sqlx::query_as::<_, GroupInvite>(
            r#"
            INSERT INTO group_invites (invite_id, sender_id, receiver_id, group_id, status, created_at)
            VALUES ($1, $2, $3, $4, 'pending', NOW())
            RETURNING invite_id, sender_id, receiver_id, group_id, status, created_at, responded_at
            "#,
        )
        .bind(&invite_id)
        .bind(&sender.user_id)
        .bind(&receiver.user_id)
        .bind(&group.group_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        // 提交后扇出，投递失败不影响已提交的邀请
        let mut refs = NotificationRefs::group(&group.group_id);
        refs.invite_id = Some(invite.invite_id.clone());
        fanout.notify(
            &receiver.user_id,
            NotificationKind::GroupInvite,
            format!("{} 邀请您加入群组 {}", sender.nickname, group.name),
            refs,
        );
        fanout.email(
            &receiver.email,
            format!("群组邀请: {}", group.name),
            format!(
                "{} 邀请您加入群组 {}，请登录后处理该邀请。",
                sender.nickname, group.name
            ),
            None,
        );

        Ok(invite)
    }

    /// 响应邀请。只匹配 pending 行，二次响应自然落空；
    /// 接受时成员检查和状态更新在同一事务内，冲突则整体回滚
    pub async fn respond(
        pool: &PgPool,
        fanout: &Fanout,
        req: RespondInviteRequest,
        caller: &CurrentUser,
    ) -> Result<Self, AppError> {
        let status = InviteStatus::parse(&req.status)
            .filter(InviteStatus::is_terminal)
            .ok_or_else(|| AppError::InvalidPayload("无效的邀请状态".to_string()))?;

        let mut tx = pool.begin().await?;

        let invite = sqlx::query_as::<_, GroupInvite>(
            r#"
            SELECT invite_id, sender_id, receiver_id, group_id, status, created_at, responded_at
            FROM group_invites
            WHERE invite_id = $1 AND receiver_id = $2 AND status = 'pending'
            "#,
        )
        .bind(&req.invite_id)
        .bind(&caller.user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFoundOrAlreadyResolved)?;

        let updated = sqlx::query_as::<_, GroupInvite>(
            r#"
            UPDATE group_invites
            SET status = $2, responded_at = NOW()
            WHERE invite_id = $1
            RETURNING invite_id, sender_id, receiver_id, group_id, status, created_at, responded_at
            "#,
        )
        .bind(&invite.invite_id)
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await?;

        if status == InviteStatus::Accepted {
            if Group::is_member(&mut *tx, &invite.group_id, &caller.user_id).await? {
                // 已是成员：回滚整个事务，状态变更一并撤销
                tx.rollback().await?;
                return Err(AppError::Conflict("已经是该群组成员".to_string()));
            }

            sqlx::query(
                r#"
                INSERT INTO group_members (group_id, user_id, joined_at)
                VALUES ($1, $2, NOW())
                "#,
            )
            .bind(&invite.group_id)
            .bind(&caller.user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        // 提交后给双方扇出通知和邮件
        let group_name = Group::find_by_id(pool, &invite.group_id)
            .await
            .ok()
            .flatten()
            .map(|g| g.name)
            .unwrap_or_else(|| invite.group_id.clone());
        let verb = if status == InviteStatus::Accepted {
            "接受"
        } else {
            "拒绝"
        };

        let mut refs = NotificationRefs::group(&invite.group_id);
        refs.invite_id = Some(invite.invite_id.clone());
        fanout.notify(
            &invite.sender_id,
            NotificationKind::GroupInviteResponse,
            format!("{} {}了加入群组 {} 的邀请", caller.nickname, verb, group_name),
            refs.clone(),
        );
        fanout.notify(
            &caller.user_id,
            NotificationKind::GroupInviteResponse,
            format!("您已{}加入群组 {} 的邀请", verb, group_name),
            refs,
        );

        if let Ok(Some(sender)) = User::find_by_id(pool, &invite.sender_id).await {
            fanout.email(
                &sender.email,
                format!("群组邀请已{}", verb),
                format!("{} {}了加入群组 {} 的邀请。", caller.nickname, verb, group_name),
                None,
            );
        }
        fanout.email(
            &caller.email,
            format!("您已{}群组邀请", verb),
            format!("您已{}加入群组 {} 的邀请。", verb, group_name),
            None,
        );

        Ok(updated)
    }

    pub async fn find_by_receiver(
        pool: &PgPool,
        receiver_id: &str,
    ) -> Result<Vec<InviteDetail>, sqlx::Error> {
        let invites = sqlx::query_as::<_, InviteDetail>(
            r#"
            SELECT
                i.invite_id,
                i.sender_id,
                u.nickname AS sender_nickname,
                i.group_id,
                g.name AS group_name,
                i.status,
                i.created_at
            FROM group_invites i
            JOIN users u ON i.sender_id = u.user_id
            JOIN groups g ON i.group_id = g.group_id
            WHERE i.receiver_id = $1
            ORDER BY i.created_at DESC
            "#,
        )
        .bind(receiver_id)
        .fetch_all(pool)
        .await?;

        Ok(invites)
    }
}
