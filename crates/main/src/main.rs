//! 主应用程序入口
//!
//! 加载配置，选择消息存储，启动 Axum 实时聊天服务。

use std::sync::Arc;

use application::{Core, CoreDependencies, MessageStore, SystemClock};
use config::AppConfig;
use infrastructure::{Db, InMemoryMessageStore, JwtUserDirectory, PgMessageStore};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load()?;

    // 配置了数据库时使用 PostgreSQL，否则消息只保存在内存中
    let message_store: Arc<dyn MessageStore> = match &config.database.url {
        Some(url) => {
            tracing::info!(
                "连接数据库: {}",
                url.rsplit('@').next().unwrap_or("unknown")
            );
            let pool = Db::connect(url, config.database.max_connections).await?;
            Arc::new(PgMessageStore::new(pool))
        }
        None => {
            tracing::warn!("未配置数据库，使用内存消息存储");
            Arc::new(InMemoryMessageStore::new())
        }
    };

    let core = Core::new(
        CoreDependencies {
            user_directory: Arc::new(JwtUserDirectory::new(config.jwt.clone())),
            message_store,
            clock: Arc::new(SystemClock),
        },
        config.realtime.clone(),
    );

    let app = router(AppState::new(core));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("聊天室服务器启动在 http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务器已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听关闭信号");
        std::future::pending::<()>().await;
    }
}
