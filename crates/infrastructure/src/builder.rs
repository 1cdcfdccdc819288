use std::sync::Arc;

use application::{LocalBroadcastGroup, PushProvider};
use config::AppConfig;
use thiserror::Error;

use crate::{
    migrations::MIGRATOR,
    push::ExpoPushClient,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct Infrastructure {
    pub storage: Arc<PgStorage>,
    pub push_client: Arc<ExpoPushClient>,
    pub broadcaster: Arc<LocalBroadcastGroup>,
}

impl Infrastructure {
    /// 连接数据库、执行迁移并创建推送客户端
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!("数据库迁移完成");

        let storage = Arc::new(PgStorage::new(pool));
        let push_client = Arc::new(ExpoPushClient::new(&config.push)?);
        if !push_client.is_enabled() {
            tracing::warn!("推送通知已禁用");
        }
        let broadcaster = Arc::new(LocalBroadcastGroup::new(config.broadcast.capacity));

        Ok(Self {
            storage,
            push_client,
            broadcaster,
        })
    }

    pub fn push_provider(&self) -> Arc<dyn PushProvider> {
        self.push_client.clone()
    }
}
