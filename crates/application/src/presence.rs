use std::collections::HashMap;

use domain::{RoomId, UserId};
use tokio::sync::RwLock;

use crate::error::ApplicationError;

/// 在线状态注册表
///
/// 记录每个用户当前正在查看的聊天室（每个用户最多一个）。只用于判断是否需要
/// 推送通知，绝不参与权限判断。
#[async_trait::async_trait]
pub trait PresenceRegistry: Send + Sync {
    /// 标记用户正在查看某个房间，覆盖之前的记录
    async fn mark_active(&self, user_id: UserId, room_id: RoomId) -> Result<(), ApplicationError>;

    /// 无条件清除用户的记录，用户不存在时什么也不做
    async fn clear(&self, user_id: UserId) -> Result<(), ApplicationError>;

    /// 用户当前所在的房间
    async fn current_room(&self, user_id: UserId) -> Result<Option<RoomId>, ApplicationError>;

    /// 用户当前是否正在查看 `room_id`；没有记录时返回 false
    async fn is_active_in(&self, user_id: UserId, room_id: RoomId) -> Result<bool, ApplicationError> {
        Ok(self.current_room(user_id).await? == Some(room_id))
    }
}

/// 单进程内存实现
///
/// 所有读写都经过同一把读写锁，`mark_active`/`clear` 不会交错执行。
#[derive(Default)]
pub struct InMemoryPresenceRegistry {
    entries: RwLock<HashMap<UserId, RoomId>>,
}

impl InMemoryPresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前在线用户数量
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl PresenceRegistry for InMemoryPresenceRegistry {
    async fn mark_active(&self, user_id: UserId, room_id: RoomId) -> Result<(), ApplicationError> {
        let previous = self.entries.write().await.insert(user_id, room_id);

        tracing::debug!(
            user_id = %user_id,
            room_id = %room_id,
            previous_room = ?previous,
            "用户进入房间"
        );
        Ok(())
    }

    async fn clear(&self, user_id: UserId) -> Result<(), ApplicationError> {
        if let Some(room_id) = self.entries.write().await.remove(&user_id) {
            tracing::debug!(user_id = %user_id, room_id = %room_id, "清理用户在线状态");
        }
        Ok(())
    }

    async fn current_room(&self, user_id: UserId) -> Result<Option<RoomId>, ApplicationError> {
        Ok(self.entries.read().await.get(&user_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn user(id: i64) -> UserId {
        UserId::new(id)
    }

    fn room(id: i64) -> RoomId {
        RoomId::new(id)
    }

    #[tokio::test]
    async fn mark_active_answers_only_for_that_room() {
        let registry = InMemoryPresenceRegistry::new();
        registry.mark_active(user(1), room(10)).await.unwrap();

        assert!(registry.is_active_in(user(1), room(10)).await.unwrap());
        assert!(!registry.is_active_in(user(1), room(11)).await.unwrap());
        assert!(!registry.is_active_in(user(2), room(10)).await.unwrap());
    }

    #[tokio::test]
    async fn mark_active_overwrites_previous_room() {
        let registry = InMemoryPresenceRegistry::new();
        registry.mark_active(user(1), room(10)).await.unwrap();
        registry.mark_active(user(1), room(11)).await.unwrap();

        assert_eq!(registry.current_room(user(1)).await.unwrap(), Some(room(11)));
        assert!(!registry.is_active_in(user(1), room(10)).await.unwrap());
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let registry = InMemoryPresenceRegistry::new();
        registry.clear(user(1)).await.unwrap();

        registry.mark_active(user(1), room(10)).await.unwrap();
        registry.clear(user(1)).await.unwrap();
        registry.clear(user(1)).await.unwrap();

        assert!(!registry.is_active_in(user(1), room(10)).await.unwrap());
        assert!(registry.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_do_not_lose_entries() {
        let registry = Arc::new(InMemoryPresenceRegistry::new());

        let tasks: Vec<_> = (0..200)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry.mark_active(user(i), room(i % 7)).await.unwrap();
                    if i % 2 == 0 {
                        registry.clear(user(i)).await.unwrap();
                    }
                })
            })
            .collect();
        futures::future::join_all(tasks).await;

        assert_eq!(registry.len().await, 100);
        for i in 0..200 {
            let expected = if i % 2 == 0 { None } else { Some(room(i % 7)) };
            assert_eq!(registry.current_room(user(i)).await.unwrap(), expected);
        }
    }
}
