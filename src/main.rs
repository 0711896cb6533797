use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use agora_backend::{
    AppState,
    config::Config,
    middleware::{RateLimiter, auth_middleware, log_errors, rate_limit},
    notify::{Fanout, mailer_from_config, spawn_worker},
    routes,
};
use axum::{
    Router,
    routing::{get, post},
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'agora_backend';").await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    // 设置 Redis 客户端
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
    let redis_arc = Arc::new(redis_client.clone());

    // 通知扇出队列与后台投递任务
    let (fanout, fanout_rx) = Fanout::channel(config.fanout_queue_size);
    let mailer = mailer_from_config(&config);
    spawn_worker(pool.clone(), mailer, fanout_rx);

    // 设置应用状态
    let state = AppState {
        pool,
        config: config.clone(),
        redis: redis_arc,
        fanout,
    };

    // 设置限流器
    let rate_limiter = Arc::new(RateLimiter::new(redis_client, config.clone()));

    // 将路由分为公开路由和受保护路由
    let public_routes = Router::new()
        .route("/users/register", post(routes::user::register))
        .route("/users/login", post(routes::user::login));

    let protected_routes = Router::new()
        // 用户
        .route("/users/check-token", get(routes::user::check_token))
        // 群组
        .route("/groups/create", post(routes::group::create_group))
        .route("/groups/by-id", get(routes::group::find_by_id))
        .route("/groups/mine", get(routes::group::my_groups))
        .route("/groups/members", get(routes::group::group_members))
        .route("/groups/leave", post(routes::group::leave_group))
        .route("/groups/delete", post(routes::group::delete_group))
        // 群组邀请
        .route("/invites/create", post(routes::invite::create_invite))
        .route("/invites/respond", post(routes::invite::respond_invite))
        .route("/invites/mine", get(routes::invite::my_invites))
        // 群组会议
        .route("/meetings/create", post(routes::meeting::create_meeting))
        .route(
            "/meetings/respond",
            post(routes::meeting::respond_meeting_invite),
        )
        .route("/meetings/by-group", get(routes::meeting::group_meetings))
        .route(
            "/meetings/my-invites",
            get(routes::meeting::my_meeting_invites),
        )
        // 选举
        .route("/elections/create", post(routes::election::create_election))
        .route("/elections/end", post(routes::election::end_election))
        .route(
            "/elections/by-group",
            get(routes::election::group_elections),
        )
        .route("/positions/create", post(routes::election::create_position))
        .route("/positions/delete", post(routes::election::delete_position))
        .route(
            "/candidates/nominate",
            post(routes::election::nominate_candidate),
        )
        .route(
            "/candidates/by-position",
            get(routes::election::position_candidates),
        )
        .route("/votes/cast", post(routes::election::cast_vote))
        .route(
            "/votes/tally-by-candidate",
            get(routes::election::tally_by_candidate),
        )
        .route(
            "/votes/tally-by-position",
            get(routes::election::tally_by_position),
        )
        // 消息
        .route("/messages/create", post(routes::message::create_message))
        .route("/messages/get", post(routes::message::get_messages))
        // 应用认证中间件
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // 创建基础路由
    let router = Router::new().nest(
        &config.api_base_uri.clone(),
        Router::new().merge(public_routes).merge(protected_routes),
    );

    // 添加日志中间件和限流中间件
    let router = router.layer(
        ServiceBuilder::new()
            .layer(axum::middleware::from_fn(log_errors))
            .layer(axum::middleware::from_fn_with_state(
                rate_limiter,
                rate_limit,
            )),
    );

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(CorsLayer::permissive())
    };

    // 添加应用状态
    let app = router.with_state(state.clone());

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
