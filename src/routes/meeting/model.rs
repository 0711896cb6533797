use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::notify::{Fanout, NotificationKind, NotificationRefs};
use crate::routes::group::model::Group;
use crate::routes::invite::model::InviteStatus;
use crate::routes::user::model::User;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct GroupMeeting {
    pub meeting_id: String,
    pub group_id: String,
    pub creator_id: String,
    pub location: String,
    pub time_from: DateTime<Utc>,
    pub time_to: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct GroupMeetingInvite {
    pub invite_id: String,
    pub meeting_id: String,
    pub user_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

/// 群组会议列表行，带调用方自己的邀请状态
#[derive(Debug, Serialize, FromRow)]
pub struct MeetingWithMyStatus {
    pub meeting_id: String,
    pub group_id: String,
    pub creator_id: String,
    pub location: String,
    pub time_from: DateTime<Utc>,
    pub time_to: DateTime<Utc>,
    pub my_status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMeetingRequest {
    pub location: Option<String>,
    pub time_from: Option<DateTime<Utc>>,
    pub time_to: Option<DateTime<Utc>>,
    pub group_id: Option<String>,
    pub invitees: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RespondMeetingInviteRequest {
    pub meeting_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct CreateMeetingResponse {
    pub meeting: GroupMeeting,
    pub invited: Vec<String>,
}

/// 校验后的会议字段
pub struct ValidMeeting {
    pub location: String,
    pub time_from: DateTime<Utc>,
    pub time_to: DateTime<Utc>,
    pub group_id: String,
}

impl CreateMeetingRequest {
    /// 写库前收集全部缺失字段名
    pub fn validate(self) -> Result<(ValidMeeting, Option<Vec<String>>), AppError> {
        let mut missing = Vec::new();
        if self.location.as_deref().is_none_or(str::is_empty) {
            missing.push("location");
        }
        if self.time_from.is_none() {
            missing.push("time_from");
        }
        if self.time_to.is_none() {
            missing.push("time_to");
        }
        if self.group_id.as_deref().is_none_or(str::is_empty) {
            missing.push("group_id");
        }
        if !missing.is_empty() {
            return Err(AppError::MissingFields(missing));
        }

        Ok((
            ValidMeeting {
                location: self.location.unwrap(),
                time_from: self.time_from.unwrap(),
                time_to: self.time_to.unwrap(),
                group_id: self.group_id.unwrap(),
            },
            self.invitees,
        ))
    }
}

/// 显式受邀人列表去重；空列表视同未提供，回退到成员快照
fn explicit_invitees(invitees: Option<Vec<String>>) -> Option<Vec<String>> {
    match invitees {
        Some(ids) if !ids.is_empty() => {
            let mut seen = HashSet::new();
            Some(
                ids.into_iter()
                    .filter(|id| seen.insert(id.clone()))
                    .collect(),
            )
        }
        _ => None,
    }
}

/// 通知与邮件共用的收件人
struct Recipient {
    user_id: String,
    nickname: String,
    email: String,
}

impl GroupMeeting {
    /// 创建会议并批量生成 pending 邀请，全部在一个事务内。
    /// 受邀人、通知、邮件都取自同一份收件人快照
    pub async fn create(
        pool: &PgPool,
        fanout: &Fanout,
        req: CreateMeetingRequest,
        creator: &CurrentUser,
    ) -> Result<CreateMeetingResponse, AppError> {
        let (fields, invitees) = req.validate()?;

        let group = Group::find_by_id(pool, &fields.group_id)
            .await?
            .ok_or_else(|| AppError::InvalidPayload("群组不存在".to_string()))?;

        let recipients: Vec<Recipient> = match explicit_invitees(invitees) {
            Some(ids) => User::find_by_ids(pool, &ids)
                .await?
                .into_iter()
                .map(|u| Recipient {
                    user_id: u.user_id,
                    nickname: u.nickname,
                    email: u.email,
                })
                .collect(),
            None => Group::members(pool, &group.group_id)
                .await?
                .into_iter()
                .map(|m| Recipient {
                    user_id: m.user_id,
                    nickname: m.nickname,
                    email: m.email,
                })
                .collect(),
        };

        let meeting_id = Uuid::new_v4().to_string();

        let mut tx = pool.begin().await?;

        let meeting = sqlx::query_as::<_, GroupMeeting>(
            r#"
            INSERT INTO group_meetings (meeting_id, group_id, creator_id, location, time_from, time_to, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING meeting_id, group_id, creator_id, location, time_from, time_to, created_at
            "#,
        )
        .bind(&meeting_id)
        .bind(&group.group_id)
        .bind(&creator.user_id)
        .bind(&fields.location)
        .bind(fields.time_from)
        .bind(fields.time_to)
        .fetch_one(&mut *tx)
        .await?;

        for recipient in &recipients {
            sqlx::query(
                r#"
                INSERT INTO group_meeting_invites (invite_id, meeting_id, user_id, status, created_at)
                VALUES ($1, $2, $3, 'pending', NOW())
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&meeting_id)
            .bind(&recipient.user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let when = meeting.time_from.format("%Y-%m-%d %H:%M");
        let mut refs = NotificationRefs::group(&group.group_id);
        refs.meeting_id = Some(meeting.meeting_id.clone());

        fanout.notify(
            &creator.user_id,
            NotificationKind::MeetingCreated,
            format!("会议已创建: {} {} ({})", group.name, when, meeting.location),
            refs.clone(),
        );
        fanout.email(
            &creator.email,
            format!("会议已创建: {}", group.name),
            format!(
                "您在群组 {} 创建的会议已安排在 {}，地点 {}。",
                group.name, when, meeting.location
            ),
            None,
        );

        for recipient in &recipients {
            fanout.notify(
                &recipient.user_id,
                NotificationKind::MeetingCreated,
                format!(
                    "{} 邀请您参加群组 {} 的会议: {} ({})",
                    creator.nickname, group.name, when, meeting.location
                ),
                refs.clone(),
            );
            fanout.email(
                &recipient.email,
                format!("会议邀请: {}", group.name),
                format!(
                    "{}，{} 邀请您参加群组 {} 在 {} 的会议，地点 {}。",
                    recipient.nickname, creator.nickname, group.name, when, meeting.location
                ),
                None,
            );
        }

        Ok(CreateMeetingResponse {
            meeting,
            invited: recipients.into_iter().map(|r| r.user_id).collect(),
        })
    }

    /// 响应会议邀请。无邀请行为 NotFound，
    /// 已处于终态视为已处理，不允许覆盖
    pub async fn respond(
        pool: &PgPool,
        fanout: &Fanout,
        req: RespondMeetingInviteRequest,
        caller: &CurrentUser,
    ) -> Result<GroupMeetingInvite, AppError> {
        let status = InviteStatus::parse(&req.status)
            .filter(InviteStatus::is_terminal)
            .ok_or_else(|| AppError::InvalidPayload("无效的邀请状态".to_string()))?;

        let mut tx = pool.begin().await?;

        let invite = sqlx::query_as::<_, GroupMeetingInvite>(
            r#"
            SELECT invite_id, meeting_id, user_id, status, created_at, responded_at
            FROM group_meeting_invites
            WHERE meeting_id = $1 AND user_id = $2
            "#,
        )
        .bind(&req.meeting_id)
        .bind(&caller.user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("未找到会议邀请".to_string()))?;

        if invite.status != InviteStatus::Pending.as_str() {
            return Err(AppError::NotFoundOrAlreadyResolved);
        }

        let updated = sqlx::query_as::<_, GroupMeetingInvite>(
            r#"
            UPDATE group_meeting_invites
            SET status = $2, responded_at = NOW()
            WHERE invite_id = $1
            RETURNING invite_id, meeting_id, user_id, status, created_at, responded_at
            "#,
        )
        .bind(&invite.invite_id)
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        // 提交后向会议创建者与响应者双向通知
        let verb = if status == InviteStatus::Accepted {
            "接受"
        } else {
            "拒绝"
        };
        let meeting = Self::find_by_id(pool, &invite.meeting_id).await.ok().flatten();

        let mut refs = NotificationRefs::meeting(&invite.meeting_id);
        if let Some(m) = &meeting {
            refs.group_id = Some(m.group_id.clone());
        }

        if let Some(m) = &meeting {
            fanout.notify(
                &m.creator_id,
                NotificationKind::MeetingInviteResponse,
                format!("{} {}了 {} 的会议邀请", caller.nickname, verb, m.location),
                refs.clone(),
            );
        }
        fanout.notify(
            &caller.user_id,
            NotificationKind::MeetingInviteResponse,
            format!("您已{}会议邀请", verb),
            refs,
        );

        Ok(updated)
    }

    pub async fn find_by_id(pool: &PgPool, meeting_id: &str) -> Result<Option<Self>, sqlx::Error> {
        let meeting = sqlx::query_as::<_, GroupMeeting>(
            r#"
            SELECT meeting_id, group_id, creator_id, location, time_from, time_to, created_at
            FROM group_meetings
            WHERE meeting_id = $1
            "#,
        )
        .bind(meeting_id)
        .fetch_optional(pool)
        .await?;

        Ok(meeting)
    }

    /// 群组会议列表，LEFT JOIN 出调用方自己的邀请状态
    pub async fn find_by_group(
        pool: &PgPool,
        group_id: &str,
        user_id: &str,
    ) -> Result<Vec<MeetingWithMyStatus>, sqlx::Error> {
        let meetings = sqlx::query_as::<_, MeetingWithMyStatus>(
            r#"
            SELECT
                m.meeting_id,
                m.group_id,
                m.creator_id,
                m.location,
                m.time_from,
                m.time_to,
                i.status AS my_status
            FROM group_meetings m
            LEFT JOIN group_meeting_invites i
                ON m.meeting_id = i.meeting_id AND i.user_id = $2
            WHERE m.group_id = $1
            ORDER BY m.time_from DESC
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(meetings)
    }

    pub async fn pending_invites_for_user(
        pool: &PgPool,
        user_id: &str,
    ) -> Result<Vec<GroupMeetingInvite>, sqlx::Error> {
        let invites = sqlx::query_as::<_, GroupMeetingInvite>(
            r#"
            SELECT invite_id, meeting_id, user_id, status, created_at, responded_at
            FROM group_meeting_invites
            WHERE user_id = $1 AND status = 'pending'
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(invites)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_request() -> CreateMeetingRequest {
        CreateMeetingRequest {
            location: Some("活动室".to_string()),
            time_from: Some(Utc::now()),
            time_to: Some(Utc::now()),
            group_id: Some("g-1".to_string()),
            invitees: None,
        }
    }

    #[test]
    fn validate_passes_with_all_fields() {
        let (fields, invitees) = full_request().validate().unwrap();
        assert_eq!(fields.location, "活动室");
        assert_eq!(fields.group_id, "g-1");
        assert!(invitees.is_none());
    }

    #[test]
    fn validate_collects_all_missing_names() {
        let req = CreateMeetingRequest {
            location: None,
            time_from: None,
            time_to: Some(Utc::now()),
            group_id: Some("g-1".to_string()),
            invitees: None,
        };
        match req.validate() {
            Err(AppError::MissingFields(fields)) => {
                assert_eq!(fields, vec!["location", "time_from"]);
            }
            other => panic!("expected MissingFields, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn validate_treats_empty_strings_as_missing() {
        let mut req = full_request();
        req.location = Some(String::new());
        req.group_id = Some(String::new());
        match req.validate() {
            Err(AppError::MissingFields(fields)) => {
                assert_eq!(fields, vec!["location", "group_id"]);
            }
            other => panic!("expected MissingFields, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn empty_invitee_list_falls_back_to_snapshot() {
        assert_eq!(explicit_invitees(None), None);
        assert_eq!(explicit_invitees(Some(vec![])), None);
    }

    #[test]
    fn explicit_invitees_are_deduplicated_in_order() {
        let ids = vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
            "c".to_string(),
            "b".to_string(),
        ];
        assert_eq!(
            explicit_invitees(Some(ids)),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }
}
