//! 核心工作流的数据库集成测试。
//! 需要 TEST_DATABASE_URL 指向一个可用的 Postgres，
//! 未设置时测试直接跳过。

use agora_backend::middleware::CurrentUser;
use agora_backend::notify::Fanout;
use agora_backend::routes::election::model::{
    Candidate, CastVoteRequest, CreateElectionRequest, CreatePositionRequest, Election,
    NominateRequest, Position, Vote,
};
use agora_backend::routes::group::model::{CreateGroupRequest, Group};
use agora_backend::routes::invite::model::{
    CreateInviteRequest, GroupInvite, RespondInviteRequest,
};
use agora_backend::routes::meeting::model::{CreateMeetingRequest, GroupMeeting, RespondMeetingInviteRequest};
use agora_backend::routes::user::model::{RegisterRequest, User};
use agora_backend::error::AppError;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

async fn test_pool() -> Option<PgPool> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping database test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");

    Some(pool)
}

fn fanout() -> Fanout {
    // 不挂载消费者，扇出任务堆积在队列里即可
    let (fanout, _rx) = Fanout::channel(1024);
    fanout
}

async fn seed_user(pool: &PgPool, name: &str) -> User {
    let suffix = Uuid::new_v4().simple().to_string();
    User::create(
        pool,
        RegisterRequest {
            user_id: format!("{}_{}", name, suffix),
            nickname: name.to_string(),
            email: format!("{}@example.com", suffix),
            password: "password".to_string(),
        },
    )
    .await
    .expect("seed user")
}

fn as_caller(user: &User) -> CurrentUser {
    CurrentUser {
        user_id: user.user_id.clone(),
        nickname: user.nickname.clone(),
        email: user.email.clone(),
        role: user.role.clone(),
    }
}

async fn seed_group(pool: &PgPool, creator: &User) -> Group {
    Group::create(
        pool,
        CreateGroupRequest {
            name: format!("group-{}", Uuid::new_v4().simple()),
            description: None,
        },
        &as_caller(creator),
    )
    .await
    .expect("seed group")
}

async fn member_count(pool: &PgPool, group_id: &str, user_id: &str) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM group_members WHERE group_id = $1 AND user_id = $2",
    )
    .bind(group_id)
    .bind(user_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn invite_status(pool: &PgPool, invite_id: &str) -> String {
    sqlx::query_scalar("SELECT status FROM group_invites WHERE invite_id = $1")
        .bind(invite_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn accepted_invite_creates_membership_once() {
    let Some(pool) = test_pool().await else { return };
    let fanout = fanout();

    let admin = seed_user(&pool, "admin").await;
    let alice = seed_user(&pool, "alice").await;
    let group = seed_group(&pool, &admin).await;

    let invite = GroupInvite::create(
        &pool,
        &fanout,
        CreateInviteRequest {
            receiver_id: alice.user_id.clone(),
            group_id: group.group_id.clone(),
        },
        &as_caller(&admin),
    )
    .await
    .unwrap();
    assert_eq!(invite.status, "pending");

    let resolved = GroupInvite::respond(
        &pool,
        &fanout,
        RespondInviteRequest {
            invite_id: invite.invite_id.clone(),
            status: "accepted".to_string(),
        },
        &as_caller(&alice),
    )
    .await
    .unwrap();
    assert_eq!(resolved.status, "accepted");
    assert_eq!(member_count(&pool, &group.group_id, &alice.user_id).await, 1);
}

#[tokio::test]
async fn second_response_fails_and_keeps_first_outcome() {
    let Some(pool) = test_pool().await else { return };
    let fanout = fanout();

    let admin = seed_user(&pool, "admin").await;
    let alice = seed_user(&pool, "alice").await;
    let group = seed_group(&pool, &admin).await;

    let invite = GroupInvite::create(
        &pool,
        &fanout,
        CreateInviteRequest {
            receiver_id: alice.user_id.clone(),
            group_id: group.group_id.clone(),
        },
        &as_caller(&admin),
    )
    .await
    .unwrap();

    GroupInvite::respond(
        &pool,
        &fanout,
        RespondInviteRequest {
            invite_id: invite.invite_id.clone(),
            status: "declined".to_string(),
        },
        &as_caller(&alice),
    )
    .await
    .unwrap();

    // 二次响应找不到 pending 行，终态不被覆盖
    let err = GroupInvite::respond(
        &pool,
        &fanout,
        RespondInviteRequest {
            invite_id: invite.invite_id.clone(),
            status: "accepted".to_string(),
        },
        &as_caller(&alice),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFoundOrAlreadyResolved));
    assert_eq!(invite_status(&pool, &invite.invite_id).await, "declined");
    assert_eq!(member_count(&pool, &group.group_id, &alice.user_id).await, 0);
}

#[tokio::test]
async fn accepting_as_existing_member_rolls_back_entirely() {
    let Some(pool) = test_pool().await else { return };
    let fanout = fanout();

    let admin = seed_user(&pool, "admin").await;
    let alice = seed_user(&pool, "alice").await;
    let group = seed_group(&pool, &admin).await;

    let invite = GroupInvite::create(
        &pool,
        &fanout,
        CreateInviteRequest {
            receiver_id: alice.user_id.clone(),
            group_id: group.group_id.clone(),
        },
        &as_caller(&admin),
    )
    .await
    .unwrap();

    // 邀请仍 pending 时用户已通过其他途径入群
    sqlx::query("INSERT INTO group_members (group_id, user_id, joined_at) VALUES ($1, $2, NOW())")
        .bind(&group.group_id)
        .bind(&alice.user_id)
        .execute(&pool)
        .await
        .unwrap();

    let err = GroupInvite::respond(
        &pool,
        &fanout,
        RespondInviteRequest {
            invite_id: invite.invite_id.clone(),
            status: "accepted".to_string(),
        },
        &as_caller(&alice),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // 整个事务回滚：无重复成员行，状态变更也一并撤销
    assert_eq!(member_count(&pool, &group.group_id, &alice.user_id).await, 1);
    assert_eq!(invite_status(&pool, &invite.invite_id).await, "pending");
}

#[tokio::test]
async fn meeting_invites_derive_from_member_snapshot() {
    let Some(pool) = test_pool().await else { return };
    let fanout = fanout();

    let admin = seed_user(&pool, "admin").await;
    let group = seed_group(&pool, &admin).await;

    let mut members = vec![admin.user_id.clone()];
    for name in ["alice", "bob"] {
        let user = seed_user(&pool, name).await;
        sqlx::query(
            "INSERT INTO group_members (group_id, user_id, joined_at) VALUES ($1, $2, NOW())",
        )
        .bind(&group.group_id)
        .bind(&user.user_id)
        .execute(&pool)
        .await
        .unwrap();
        members.push(user.user_id.clone());
    }

    // 不传受邀人列表，落到成员快照
    let created = GroupMeeting::create(
        &pool,
        &fanout,
        CreateMeetingRequest {
            location: Some("活动室".to_string()),
            time_from: Some(Utc::now()),
            time_to: Some(Utc::now()),
            group_id: Some(group.group_id.clone()),
            invitees: None,
        },
        &as_caller(&admin),
    )
    .await
    .unwrap();

    let mut invited = created.invited.clone();
    invited.sort();
    members.sort();
    assert_eq!(invited, members);

    let pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM group_meeting_invites WHERE meeting_id = $1 AND status = 'pending'",
    )
    .bind(&created.meeting.meeting_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(pending, 3);

    // 其中一人接受，其余保持 pending
    let bob_id = members
        .iter()
        .find(|id| id.starts_with("bob"))
        .unwrap()
        .clone();
    let bob = User::find_by_id(&pool, &bob_id).await.unwrap().unwrap();

    let updated = GroupMeeting::respond(
        &pool,
        &fanout,
        RespondMeetingInviteRequest {
            meeting_id: created.meeting.meeting_id.clone(),
            status: "accepted".to_string(),
        },
        &as_caller(&bob),
    )
    .await
    .unwrap();
    assert_eq!(updated.status, "accepted");

    let still_pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM group_meeting_invites WHERE meeting_id = $1 AND status = 'pending'",
    )
    .bind(&created.meeting.meeting_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(still_pending, 2);

    // 二次响应被拒绝
    let err = GroupMeeting::respond(
        &pool,
        &fanout,
        RespondMeetingInviteRequest {
            meeting_id: created.meeting.meeting_id.clone(),
            status: "accepted".to_string(),
        },
        &as_caller(&bob),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFoundOrAlreadyResolved));
}

async fn seed_election(
    pool: &PgPool,
    fanout: &Fanout,
    admin: &User,
) -> (Election, Position, String) {
    let group = seed_group(pool, admin).await;
    let election = Election::create(
        pool,
        fanout,
        CreateElectionRequest {
            group_id: group.group_id.clone(),
            date_from: Utc::now(),
            date_to: Utc::now(),
        },
        &as_caller(admin),
    )
    .await
    .unwrap();

    let position = Position::create(
        pool,
        fanout,
        CreatePositionRequest {
            election_id: election.election_id.clone(),
            label: "会长".to_string(),
        },
        &as_caller(admin),
    )
    .await
    .unwrap();

    (election, position, group.group_id)
}

#[tokio::test]
async fn voting_right_is_single_use() {
    let Some(pool) = test_pool().await else { return };
    let fanout = fanout();

    let admin = seed_user(&pool, "admin").await;
    let voter = seed_user(&pool, "voter").await;
    let nominee_a = seed_user(&pool, "na").await;
    let nominee_b = seed_user(&pool, "nb").await;
    let (election, position, _) = seed_election(&pool, &fanout, &admin).await;

    let mut candidates = Vec::new();
    for nominee in [&nominee_a, &nominee_b] {
        candidates.push(
            Candidate::nominate(
                &pool,
                &fanout,
                NominateRequest {
                    user_id: nominee.user_id.clone(),
                    position_id: position.position_id.clone(),
                },
                &as_caller(&admin),
            )
            .await
            .unwrap(),
        );
    }

    let vote = Vote::cast(
        &pool,
        CastVoteRequest {
            election_id: election.election_id.clone(),
            candidate_id: candidates[0].candidate_id.clone(),
            position_id: position.position_id.clone(),
        },
        &as_caller(&voter),
    )
    .await
    .unwrap();
    assert_eq!(vote.position_id, position.position_id);

    // 换个候选人再投同一职位，台账拒绝
    let err = Vote::cast(
        &pool,
        CastVoteRequest {
            election_id: election.election_id.clone(),
            candidate_id: candidates[1].candidate_id.clone(),
            position_id: position.position_id.clone(),
        },
        &as_caller(&voter),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let rights: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM voting_rights WHERE user_id = $1 AND election_id = $2 AND position_id = $3",
    )
    .bind(&voter.user_id)
    .bind(&election.election_id)
    .bind(&position.position_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(rights, 1);

    let votes: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM votes WHERE election_id = $1 AND position_id = $2",
    )
    .bind(&election.election_id)
    .bind(&position.position_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(votes, 1);
}

#[tokio::test]
async fn concurrent_votes_cannot_both_succeed() {
    let Some(pool) = test_pool().await else { return };
    let fanout = fanout();

    let admin = seed_user(&pool, "admin").await;
    let voter = seed_user(&pool, "voter").await;
    let nominee = seed_user(&pool, "nominee").await;
    let (election, position, _) = seed_election(&pool, &fanout, &admin).await;

    let candidate = Candidate::nominate(
        &pool,
        &fanout,
        NominateRequest {
            user_id: nominee.user_id.clone(),
            position_id: position.position_id.clone(),
        },
        &as_caller(&admin),
    )
    .await
    .unwrap();

    let request = || CastVoteRequest {
        election_id: election.election_id.clone(),
        candidate_id: candidate.candidate_id.clone(),
        position_id: position.position_id.clone(),
    };

    let caller = as_caller(&voter);
    let (a, b) = tokio::join!(
        Vote::cast(&pool, request(), &caller),
        Vote::cast(&pool, request(), &caller),
    );
    assert_eq!(
        a.is_ok() as u8 + b.is_ok() as u8,
        1,
        "exactly one concurrent cast must win"
    );

    let votes: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM votes WHERE election_id = $1 AND position_id = $2",
    )
    .bind(&election.election_id)
    .bind(&position.position_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(votes, 1);
}

#[tokio::test]
async fn ending_election_cascades_and_tallies_empty() {
    let Some(pool) = test_pool().await else { return };
    let fanout = fanout();

    let admin = seed_user(&pool, "admin").await;
    let voter = seed_user(&pool, "voter").await;
    let nominee = seed_user(&pool, "nominee").await;
    let (election, position, _) = seed_election(&pool, &fanout, &admin).await;

    let candidate = Candidate::nominate(
        &pool,
        &fanout,
        NominateRequest {
            user_id: nominee.user_id.clone(),
            position_id: position.position_id.clone(),
        },
        &as_caller(&admin),
    )
    .await
    .unwrap();

    Vote::cast(
        &pool,
        CastVoteRequest {
            election_id: election.election_id.clone(),
            candidate_id: candidate.candidate_id.clone(),
            position_id: position.position_id.clone(),
        },
        &as_caller(&voter),
    )
    .await
    .unwrap();

    let tallies = Vote::tally_by_candidate(&pool, &election.election_id)
        .await
        .unwrap();
    assert_eq!(tallies.len(), 1);
    assert_eq!(tallies[0].votes, 1);

    Election::end(&pool, &fanout, &election.election_id, &as_caller(&admin))
        .await
        .unwrap();

    // 级联删除后汇总为空集，而不是错误
    assert!(
        Vote::tally_by_candidate(&pool, &election.election_id)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        Vote::tally_by_position(&pool, &election.election_id)
            .await
            .unwrap()
            .is_empty()
    );

    let positions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM positions WHERE election_id = $1")
        .bind(&election.election_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(positions, 0);

    let err = Election::end(&pool, &fanout, &election.election_id, &as_caller(&admin))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
