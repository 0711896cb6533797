use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::notify::{Fanout, NotificationKind, NotificationRefs};
use crate::routes::group::model::Group;
use crate::routes::user::model::User;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Election {
    pub election_id: String,
    pub group_id: String,
    pub creator_id: String,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub position_id: String,
    pub election_id: String,
    pub label: String,
    pub creator_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Candidate {
    pub candidate_id: String,
    pub position_id: String,
    pub election_id: String,
    pub user_id: String,
    pub nominated_by: String,
    pub created_at: DateTime<Utc>,
}

/// 投票权台账行。行的存在即"该名额已用"，与选票本身无关
#[derive(Debug, Serialize, FromRow)]
pub struct VotingRight {
    pub user_id: String,
    pub election_id: String,
    pub position_id: String,
    pub has_voted: bool,
    pub created_at: DateTime<Utc>,
}

/// 选票不关联投票人，匿名性由台账拆分保证
#[derive(Debug, Serialize, FromRow)]
pub struct Vote {
    pub vote_id: String,
    pub election_id: String,
    pub candidate_id: String,
    pub position_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct CandidateTally {
    pub candidate_id: String,
    pub nominee_id: String,
    pub nominee_nickname: String,
    pub nominated_by: String,
    pub position_id: String,
    pub position_label: String,
    pub votes: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct PositionTally {
    pub position_id: String,
    pub label: String,
    pub votes: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateElectionRequest {
    pub group_id: String,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePositionRequest {
    pub election_id: String,
    pub label: String,
}

#[derive(Debug, Deserialize)]
pub struct NominateRequest {
    pub user_id: String,
    pub position_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    pub election_id: String,
    pub candidate_id: String,
    pub position_id: String,
}

impl Election {
    /// 创建选举。日期先后不做校验，date_to 早于 date_from 也照常接受
    pub async fn create(
        pool: &PgPool,
        fanout: &Fanout,
        req: CreateElectionRequest,
        creator: &CurrentUser,
    ) -> Result<Self, AppError> {
        let group = Group::find_by_id(pool, &req.group_id)
            .await?
            .ok_or_else(|| AppError::InvalidPayload("群组不存在".to_string()))?;

        let election_id = Uuid::new_v4().to_string();

        let mut tx = pool.begin().await?;

        let election = sqlx::query_as::<_, Election>(
            r#"
            INSERT INTO elections (election_id, group_id, creator_id, date_from, date_to, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING election_id, group_id, creator_id, date_from, date_to, created_at
            "#,
        )
        .bind(&election_id)
        .bind(&group.group_id)
        .bind(&creator.user_id)
        .bind(req.date_from)
        .bind(req.date_to)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let range = format!(
            "{} ~ {}",
            election.date_from.format("%Y-%m-%d"),
            election.date_to.format("%Y-%m-%d")
        );
        let mut refs = NotificationRefs::election(&election.election_id);
        refs.group_id = Some(group.group_id.clone());
        fanout.notify(
            &creator.user_id,
            NotificationKind::ElectionCreated,
            format!("群组 {} 的选举已创建: {}", group.name, range),
            refs,
        );
        fanout.email(
            &creator.email,
            format!("选举已创建: {}", group.name),
            format!("您在群组 {} 创建的选举已生效，投票时间 {}。", group.name, range),
            None,
        );

        Ok(election)
    }

    /// 提前结束选举。职位/候选人/选票/投票权随外键级联删除；
    /// 删除前先取出日期范围供提交后的通知使用
    pub async fn end(
        pool: &PgPool,
        fanout: &Fanout,
        election_id: &str,
        caller: &CurrentUser,
    ) -> Result<(), AppError> {
        let election = Self::find_by_id(pool, election_id)
            .await?
            .ok_or_else(|| AppError::NotFound("选举不存在".to_string()))?;

        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM elections WHERE election_id = $1")
            .bind(election_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let range = format!(
            "{} ~ {}",
            election.date_from.format("%Y-%m-%d"),
            election.date_to.format("%Y-%m-%d")
        );
        fanout.notify(
            &caller.user_id,
            NotificationKind::ElectionEnded,
            format!("选举 ({}) 已结束", range),
            NotificationRefs::group(&election.group_id),
        );

        tracing::info!("Election {} ended by {}", election_id, caller.user_id);
        Ok(())
    }

    pub async fn find_by_id(
        pool: &PgPool,
        election_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let election = sqlx::query_as::<_, Election>(
            r#"
            SELECT election_id, group_id, creator_id, date_from, date_to, created_at
            FROM elections
            WHERE election_id = $1
            "#,
        )
        .bind(election_id)
        .fetch_optional(pool)
        .await?;

        Ok(election)
    }

    pub async fn find_by_group(pool: &PgPool, group_id: &str) -> Result<Vec<Self>, sqlx::Error> {
        let elections = sqlx::query_as::<_, Election>(
            r#"
            SELECT election_id, group_id, creator_id, date_from, date_to, created_at
            FROM elections
            WHERE group_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(group_id)
        .fetch_all(pool)
        .await?;

        Ok(elections)
    }
}

impl Position {
    pub async fn create(
        pool: &PgPool,
        fanout: &Fanout,
        req: CreatePositionRequest,
        creator: &CurrentUser,
    ) -> Result<Self, AppError> {
        let election = Election::find_by_id(pool, &req.election_id)
            .await?
            .ok_or_else(|| AppError::InvalidPayload("选举不存在".to_string()))?;

        let position_id = Uuid::new_v4().to_string();

        let mut tx = pool.begin().await?;

        let position = sqlx::query_as::<_, Position>(
            r#"
            INSERT INTO positions (position_id, election_id, label, creator_id, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING position_id, election_id, label, creator_id, created_at
            "#,
        )
        .bind(&position_id)
        .bind(&election.election_id)
        .bind(&req.label)
        .bind(&creator.user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut refs = NotificationRefs::election(&election.election_id);
        refs.position_id = Some(position.position_id.clone());
        fanout.notify(
            &creator.user_id,
            NotificationKind::PositionCreated,
            format!("职位 {} 已创建", position.label),
            refs,
        );

        Ok(position)
    }

    pub async fn delete(
        pool: &PgPool,
        fanout: &Fanout,
        position_id: &str,
        caller: &CurrentUser,
    ) -> Result<(), AppError> {
        let mut tx = pool.begin().await?;

        let deleted = sqlx::query_as::<_, Position>(
            r#"
            DELETE FROM positions
            WHERE position_id = $1
            RETURNING position_id, election_id, label, creator_id, created_at
            "#,
        )
        .bind(position_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("职位不存在".to_string()))?;

        tx.commit().await?;

        fanout.notify(
            &caller.user_id,
            NotificationKind::PositionDeleted,
            format!("职位 {} 已删除", deleted.label),
            NotificationRefs::election(&deleted.election_id),
        );

        Ok(())
    }

    pub async fn find_by_election(
        pool: &PgPool,
        election_id: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let positions = sqlx::query_as::<_, Position>(
            r#"
            SELECT position_id, election_id, label, creator_id, created_at
            FROM positions
            WHERE election_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(election_id)
        .fetch_all(pool)
        .await?;

        Ok(positions)
    }
}

impl Candidate {
    /// 提名候选人。election_id 一律取自职位记录，
    /// 不接受调用方传入，保证职位与选举一致
    pub async fn nominate(
        pool: &PgPool,
        fanout: &Fanout,
        req: NominateRequest,
        nominator: &CurrentUser,
    ) -> Result<Self, AppError> {
        let position = sqlx::query_as::<_, Position>(
            r#"
            SELECT position_id, election_id, label, creator_id, created_at
            FROM positions
            WHERE position_id = $1
            "#,
        )
        .bind(&req.position_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::InvalidPayload("职位不存在".to_string()))?;

        let nominee = User::find_by_id(pool, &req.user_id)
            .await?
            .ok_or_else(|| AppError::InvalidPayload("被提名用户不存在".to_string()))?;

        let candidate_id = Uuid::new_v4().to_string();

        let mut tx = pool.begin().await?;

        let candidate = sqlx::query_as::<_, Candidate>(
            r#"
            INSERT INTO candidates (candidate_id, position_id, election_id, user_id, nominated_by, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING candidate_id, position_id, election_id, user_id, nominated_by, created_at
            "#,
        )
        .bind(&candidate_id)
        .bind(&position.position_id)
        .bind(&position.election_id)
        .bind(&nominee.user_id)
        .bind(&nominator.user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::conflict_on_unique(e, "该用户已被提名此职位"))?;

        tx.commit().await?;

        // 先返回结果，通知与邮件经队列异步投递
        let mut refs = NotificationRefs::election(&position.election_id);
        refs.position_id = Some(position.position_id.clone());
        fanout.notify(
            &nominator.user_id,
            NotificationKind::CandidateNominated,
            format!("您已提名 {} 竞选 {}", nominee.nickname, position.label),
            refs.clone(),
        );
        fanout.notify(
            &nominee.user_id,
            NotificationKind::CandidateNominated,
            format!("{} 提名您竞选 {}", nominator.nickname, position.label),
            refs,
        );
        fanout.email(
            &nominator.email,
            "提名已提交".to_string(),
            format!("您已提名 {} 竞选职位 {}。", nominee.nickname, position.label),
            None,
        );
        fanout.email(
            &nominee.email,
            "您已被提名".to_string(),
            format!("{} 提名您竞选职位 {}。", nominator.nickname, position.label),
            None,
        );

        Ok(candidate)
    }

    pub async fn find_by_position(
        pool: &PgPool,
        position_id: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let candidates = sqlx::query_as::<_, Candidate>(
            r#"
            SELECT candidate_id, position_id, election_id, user_id, nominated_by, created_at
            FROM candidates
            WHERE position_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(position_id)
        .fetch_all(pool)
        .await?;

        Ok(candidates)
    }
}

impl Vote {
    /// 投票。台账查询、台账写入、选票写入在同一事务内：
    /// 要么投票权和选票同时存在，要么都不存在。
    /// (user, election, position) 上的唯一索引把并发竞争
    /// 转化为约束冲突，同一名额绝不会被用两次
    pub async fn cast(
        pool: &PgPool,
        req: CastVoteRequest,
        voter: &CurrentUser,
    ) -> Result<Self, AppError> {
        let mut tx = pool.begin().await?;

        let existing: Option<VotingRight> = sqlx::query_as(
            r#"
            SELECT user_id, election_id, position_id, has_voted, created_at
            FROM voting_rights
            WHERE user_id = $1 AND election_id = $2 AND position_id = $3
            "#,
        )
        .bind(&voter.user_id)
        .bind(&req.election_id)
        .bind(&req.position_id)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            tx.rollback().await?;
            return Err(AppError::Conflict("您已为该职位投过票".to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO voting_rights (user_id, election_id, position_id, has_voted, created_at)
            VALUES ($1, $2, $3, TRUE, NOW())
            "#,
        )
        .bind(&voter.user_id)
        .bind(&req.election_id)
        .bind(&req.position_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::conflict_on_unique(e, "您已为该职位投过票"))?;

        let vote = sqlx::query_as::<_, Vote>(
            r#"
            INSERT INTO votes (vote_id, election_id, candidate_id, position_id, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING vote_id, election_id, candidate_id, position_id, created_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&req.election_id)
        .bind(&req.candidate_id)
        .bind(&req.position_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::invalid_on_fk(e, "候选人、职位或选举不存在"))?;

        tx.commit().await?;

        Ok(vote)
    }

    /// 按候选人汇总票数。纯聚合查询，选举删除后返回空集而非错误
    pub async fn tally_by_candidate(
        pool: &PgPool,
        election_id: &str,
    ) -> Result<Vec<CandidateTally>, sqlx::Error> {
        let tallies = sqlx::query_as::<_, CandidateTally>(
            r#"
            SELECT
                c.candidate_id,
                c.user_id AS nominee_id,
                u.nickname AS nominee_nickname,
                c.nominated_by,
                c.position_id,
                p.label AS position_label,
                COUNT(v.vote_id) AS votes
            FROM candidates c
            JOIN users u ON c.user_id = u.user_id
            JOIN positions p ON c.position_id = p.position_id
            LEFT JOIN votes v ON v.candidate_id = c.candidate_id
            WHERE c.election_id = $1
            GROUP BY c.candidate_id, c.user_id, u.nickname, c.nominated_by, c.position_id, p.label
            ORDER BY votes DESC
            "#,
        )
        .bind(election_id)
        .fetch_all(pool)
        .await?;

        Ok(tallies)
    }

    pub async fn tally_by_position(
        pool: &PgPool,
        election_id: &str,
    ) -> Result<Vec<PositionTally>, sqlx::Error> {
        let tallies = sqlx::query_as::<_, PositionTally>(
            r#"
            SELECT
                p.position_id,
                p.label,
                COUNT(v.vote_id) AS votes
            FROM positions p
            LEFT JOIN votes v ON v.position_id = p.position_id
            WHERE p.election_id = $1
            GROUP BY p.position_id, p.label
            ORDER BY p.created_at
            "#,
        )
        .bind(election_id)
        .fetch_all(pool)
        .await?;

        Ok(tallies)
    }
}
