use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use brickvault::{
    AppState,
    cache::{MemoryResetTokenCache, ResetTokenCache, ResetTokenCacheOperations},
    config::Config,
    database::{
        MemoryDatabase, SessionPolicy, SessionRepository, SessionStore, UserRepository, UserStore,
    },
    router::create_router,
    services::{AuthService, SessionCleanupService, notifier_from_config},
    utils::{Clock, SystemClock},
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Stores = (
    Arc<dyn UserStore>,
    Arc<dyn SessionStore>,
    Arc<dyn ResetTokenCache>,
);

// 连接 Postgres 和 Redis，并执行数据库迁移
async fn connect_stores(config: &Config, clock: Arc<dyn Clock>, policy: SessionPolicy) -> Stores {
    let database_url = config
        .database_url
        .clone()
        .expect("DATABASE_URL must be set");
    let redis_url = config.redis_url.clone().expect("REDIS_URL must be set");

    let statement_timeout_ms = config.store_timeout().as_millis();
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.store_hard_timeout())
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'brickvault';").await?;
                conn.execute(format!("SET statement_timeout = {statement_timeout_ms};").as_str())
                    .await?;
                Ok(())
            })
        })
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    let pool = Arc::new(pool);
    let redis = Arc::new(redis::Client::open(redis_url).expect("Failed to create Redis client"));

    (
        Arc::new(UserRepository::new(pool.clone(), config.store_timeout())),
        Arc::new(SessionRepository::new(
            pool,
            clock.clone(),
            policy,
            config.store_timeout(),
        )),
        Arc::new(ResetTokenCacheOperations::new(
            redis,
            clock,
            config.store_timeout(),
        )),
    )
}

// 开发用的进程内存储，重启后数据丢失
fn in_memory_stores(clock: Arc<dyn Clock>, policy: SessionPolicy) -> Stores {
    let db = Arc::new(MemoryDatabase::new(clock.clone(), policy));
    (
        db.clone(),
        db,
        Arc::new(MemoryResetTokenCache::new(clock)),
    )
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

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

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let settings = config.auth_settings();
    let policy = SessionPolicy::from_settings(&settings);

    let (users, sessions, reset_tokens) = if config.use_in_memory_stores {
        tracing::warn!("Using in-memory stores, data will not survive a restart");
        in_memory_stores(clock.clone(), policy)
    } else {
        connect_stores(&config, clock.clone(), policy).await
    };

    let notifier = notifier_from_config(&config).expect("Failed to create email notifier");
    let auth = AuthService::new(
        users,
        sessions.clone(),
        reset_tokens,
        notifier,
        clock,
        settings,
    )
    .expect("Failed to create auth service");

    let state = AppState {
        config: config.clone(),
        auth: Arc::new(auth),
        cleanup: Arc::new(SessionCleanupService::new(sessions)),
    };
    state.cleanup.start(config.session_cleanup_interval());
    let app = create_router(state.clone());

    // 启动服务器
    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    state.cleanup.stop().await;
}
