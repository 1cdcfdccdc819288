//! 基础设施层实现。
//!
//! 提供 PostgreSQL 仓储、数据库迁移和 Expo 推送客户端，实现应用/领域层定义的接口。

pub mod builder;
pub mod migrations;
pub mod push;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use push::{classify_response, ExpoPushClient};
pub use repository::{
    create_pg_pool, PgChatRoomRepository, PgListingRepository, PgMessageRepository,
    PgPushTokenStore, PgStorage, PgUserDirectory,
};
