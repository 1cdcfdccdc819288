//! 主应用程序入口
//!
//! 加载配置、连接基础设施并启动 Axum Web API 服务。

use std::sync::Arc;

use application::{
    ChatRoomService, ChatRoomServiceDependencies, ChatService, ChatServiceDependencies, Clock,
    InMemoryPresenceRegistry, NotificationDispatcher, SystemClock,
};
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::load()?;
    tracing::info!(config = %config.sanitize(), "配置已加载");

    let infra = Infrastructure::connect(&config).await?;
    let storage = infra.storage.clone();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let dispatcher = Arc::new(NotificationDispatcher::new(
        infra.push_provider(),
        storage.push_tokens.clone(),
    ));

    // 在线状态只存在于本进程
    let presence = Arc::new(InMemoryPresenceRegistry::new());

    let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
        room_repository: storage.room_repository.clone(),
        message_repository: storage.message_repository.clone(),
        push_tokens: storage.push_tokens.clone(),
        presence,
        broadcaster: infra.broadcaster.clone(),
        dispatcher,
        clock: clock.clone(),
    }));

    let room_service = Arc::new(ChatRoomService::new(ChatRoomServiceDependencies {
        room_repository: storage.room_repository.clone(),
        message_repository: storage.message_repository.clone(),
        listing_repository: storage.listing_repository.clone(),
        user_directory: storage.user_directory.clone(),
        push_tokens: storage.push_tokens.clone(),
        clock,
    }));

    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

    let state = AppState::new(
        chat_service,
        room_service,
        jwt_service,
        storage.user_directory.clone(),
    );

    // 启动 Web 服务器
    let app = router(state);
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!("聊天服务器启动在 http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务器已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "监听退出信号失败");
        std::future::pending::<()>().await;
    }
}
