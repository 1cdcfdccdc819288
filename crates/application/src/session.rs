//! 单个实时连接的会话状态机
//!
//! `Connecting -> Active -> Disconnected`，断开后不可再转换。会话在加入时登记
//! 在线状态和房间广播组成员身份，离开时无条件释放两者：显式调用 `close`，
//! 或者在会话被丢弃（任务被取消、panic 展开）时由 `Drop` 补做。

use std::sync::Arc;

use domain::{DomainError, RoomId, UserId, UserProfile};
use serde::Deserialize;

use crate::{
    broadcaster::{BroadcastGroup, RoomSubscription, SessionId},
    error::ApplicationError,
    presence::PresenceRegistry,
    services::{ChatService, SendMessageRequest, SendReceipt},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Disconnected,
}

/// 客户端上行帧
#[derive(Debug, Deserialize)]
struct InboundFrame {
    message: Option<String>,
}

pub struct ChatSession {
    id: SessionId,
    user: UserProfile,
    room_id: RoomId,
    service: Arc<ChatService>,
    state: SessionState,
    presence_marked: bool,
    joined: bool,
}

impl ChatSession {
    /// `user` 必须是已经认证过的身份
    pub fn new(service: Arc<ChatService>, user: UserProfile, room_id: RoomId) -> Self {
        Self {
            id: SessionId::new(),
            user,
            room_id,
            service,
            state: SessionState::Connecting,
            presence_marked: false,
            joined: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 校验房间、登记在线状态并加入广播组
    ///
    /// 失败时已经登记的部分会被撤销，会话进入 `Disconnected`。
    pub async fn join(&mut self) -> Result<RoomSubscription, ApplicationError> {
        if self.state != SessionState::Connecting {
            return Err(ApplicationError::infrastructure("session already started"));
        }

        match self.try_join().await {
            Ok(subscription) => {
                self.state = SessionState::Active;
                tracing::info!(
                    session_id = %self.id,
                    user_id = %self.user.id,
                    room_id = %self.room_id,
                    "会话已加入房间"
                );
                Ok(subscription)
            }
            Err(err) => {
                self.close().await;
                Err(err)
            }
        }
    }

    async fn try_join(&mut self) -> Result<RoomSubscription, ApplicationError> {
        self.service
            .authorize_connection(self.room_id, self.user.id)
            .await?;

        self.service
            .presence()
            .mark_active(self.user.id, self.room_id)
            .await?;
        self.presence_marked = true;

        let subscription = self
            .service
            .broadcaster()
            .join(self.room_id, self.id)
            .await?;
        self.joined = true;

        Ok(subscription)
    }

    /// 处理一条上行文本帧 `{"message": "..."}`
    pub async fn handle_text(&self, text: &str) -> Result<SendReceipt, ApplicationError> {
        if self.state != SessionState::Active {
            return Err(ApplicationError::infrastructure("session is not active"));
        }

        let frame: InboundFrame = serde_json::from_str(text)
            .map_err(|_| DomainError::invalid_argument("message", "frame must be a JSON object"))?;
        let content = frame
            .message
            .ok_or_else(|| DomainError::invalid_argument("message", "This field is required."))?;

        self.service
            .send_message(SendMessageRequest {
                room_id: self.room_id,
                sender: self.user.clone(),
                content,
            })
            .await
    }

    /// 释放在线状态和广播组成员身份，可重复调用
    pub async fn close(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.state = SessionState::Disconnected;

        self.release().run().await;
        self.presence_marked = false;
        self.joined = false;
    }

    fn release(&self) -> Release {
        Release {
            presence: self.presence_marked.then(|| Arc::clone(self.service.presence())),
            broadcaster: self.joined.then(|| Arc::clone(self.service.broadcaster())),
            user_id: self.user.id,
            room_id: self.room_id,
            session_id: self.id,
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.state = SessionState::Disconnected;

        let release = self.release();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(release.run());
            }
            Err(_) => tracing::warn!(
                session_id = %self.id,
                user_id = %self.user.id,
                "运行时已关闭，无法释放会话资源"
            ),
        }
    }
}

/// 会话需要释放的资源，只包含实际登记过的部分
struct Release {
    presence: Option<Arc<dyn PresenceRegistry>>,
    broadcaster: Option<Arc<dyn BroadcastGroup>>,
    user_id: UserId,
    room_id: RoomId,
    session_id: SessionId,
}

impl Release {
    async fn run(self) {
        if let Some(presence) = self.presence {
            if let Err(err) = presence.clear(self.user_id).await {
                tracing::error!(user_id = %self.user_id, error = %err, "清理在线状态失败");
            }
        }
        if let Some(broadcaster) = self.broadcaster {
            if let Err(err) = broadcaster.leave(self.room_id, self.session_id).await {
                tracing::error!(session_id = %self.session_id, error = %err, "离开房间广播组失败");
            }
        }
        tracing::info!(
            session_id = %self.session_id,
            user_id = %self.user_id,
            room_id = %self.room_id,
            "会话已断开"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use domain::{ChatRoom, ChatRoomRepository, NewChatRoom, PushToken};
    use time::OffsetDateTime;

    use crate::{
        broadcaster::ChatEvent,
        clock::SystemClock,
        local_broadcast::LocalBroadcastGroup,
        memory::{MemoryStore, RecordingPushProvider},
        notification::NotificationDispatcher,
        presence::InMemoryPresenceRegistry,
        services::ChatServiceDependencies,
    };

    struct Fixture {
        store: MemoryStore,
        push: RecordingPushProvider,
        presence: Arc<InMemoryPresenceRegistry>,
        broadcaster: Arc<LocalBroadcastGroup>,
        service: Arc<ChatService>,
        room: ChatRoom,
        buyer: UserProfile,
        seller: UserProfile,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let buyer = store.add_user(1, "Bob");
        let seller = store.add_user(2, "Sara");
        let listing = store.add_listing(10, "Bike", seller.id);
        store.set_push_token(seller.id, PushToken::parse("ExponentPushToken[sara]").unwrap());
        let room = ChatRoomRepository::create(
            &store,
            NewChatRoom::for_listing(&listing, buyer.id, OffsetDateTime::now_utc()).unwrap(),
        )
        .await
        .unwrap();

        let push = RecordingPushProvider::new();
        let presence = Arc::new(InMemoryPresenceRegistry::new());
        let broadcaster = Arc::new(LocalBroadcastGroup::new(16));
        let service = Arc::new(ChatService::new(ChatServiceDependencies {
            room_repository: Arc::new(store.clone()),
            message_repository: Arc::new(store.clone()),
            push_tokens: Arc::new(store.clone()),
            presence: presence.clone(),
            broadcaster: broadcaster.clone(),
            dispatcher: Arc::new(NotificationDispatcher::new(
                Arc::new(push.clone()),
                Arc::new(store.clone()),
            )),
            clock: Arc::new(SystemClock),
        }));

        Fixture {
            store,
            push,
            presence,
            broadcaster,
            service,
            room,
            buyer,
            seller,
        }
    }

    #[tokio::test]
    async fn join_registers_presence_and_membership() {
        let fx = fixture().await;
        let mut session = ChatSession::new(fx.service.clone(), fx.buyer.clone(), fx.room.id);
        assert_eq!(session.state(), SessionState::Connecting);

        let _subscription = session.join().await.unwrap();

        assert_eq!(session.state(), SessionState::Active);
        assert!(fx.presence.is_active_in(fx.buyer.id, fx.room.id).await.unwrap());
        assert_eq!(fx.broadcaster.member_count(fx.room.id), 1);
    }

    #[tokio::test]
    async fn close_releases_everything_and_is_terminal() {
        let fx = fixture().await;
        let mut session = ChatSession::new(fx.service.clone(), fx.buyer.clone(), fx.room.id);
        let _subscription = session.join().await.unwrap();

        session.close().await;
        session.close().await;

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!fx.presence.is_active_in(fx.buyer.id, fx.room.id).await.unwrap());
        assert_eq!(fx.broadcaster.member_count(fx.room.id), 0);
        assert!(session.handle_text(r#"{"message":"late"}"#).await.is_err());
        assert!(session.join().await.is_err());
    }

    #[tokio::test]
    async fn dropping_an_active_session_still_releases() {
        let fx = fixture().await;
        let mut session = ChatSession::new(fx.service.clone(), fx.buyer.clone(), fx.room.id);
        let _subscription = session.join().await.unwrap();

        drop(session);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while fx.presence.current_room(fx.buyer.id).await.unwrap().is_some() {
            assert!(tokio::time::Instant::now() < deadline, "presence was not released");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(fx.broadcaster.member_count(fx.room.id), 0);
    }

    #[tokio::test]
    async fn failed_join_leaves_no_trace() {
        let fx = fixture().await;
        let outsider = fx.store.add_user(3, "Eve");
        let mut session = ChatSession::new(fx.service.clone(), outsider.clone(), fx.room.id);

        let err = session.join().await.err().unwrap();

        assert!(matches!(err, ApplicationError::Domain(DomainError::NotParticipant)));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(fx.presence.is_empty().await);
        assert_eq!(fx.broadcaster.member_count(fx.room.id), 0);
    }

    #[tokio::test]
    async fn joining_a_missing_room_fails() {
        let fx = fixture().await;
        let mut session = ChatSession::new(fx.service.clone(), fx.buyer.clone(), RoomId::new(404));

        let err = session.join().await.err().unwrap();
        assert!(matches!(err, ApplicationError::Domain(DomainError::RoomNotFound)));
    }

    #[tokio::test]
    async fn malformed_frames_are_validation_errors() {
        let fx = fixture().await;
        let mut session = ChatSession::new(fx.service.clone(), fx.buyer.clone(), fx.room.id);
        let _subscription = session.join().await.unwrap();

        for frame in ["not json", r#"{"text":"hi"}"#, r#"{"message":"  "}"#] {
            let err = session.handle_text(frame).await.unwrap_err();
            assert!(matches!(
                err,
                ApplicationError::Domain(DomainError::InvalidArgument { field: "message", .. })
            ));
        }
        assert!(fx.store.messages_in(fx.room.id).is_empty());
    }

    #[tokio::test]
    async fn buyer_and_seller_sessions_exchange_messages() {
        let fx = fixture().await;
        let mut buyer = ChatSession::new(fx.service.clone(), fx.buyer.clone(), fx.room.id);
        let mut buyer_events = buyer.join().await.unwrap();

        // 卖家离线：推送一次
        let receipt = buyer.handle_text(r#"{"message":"hi"}"#).await.unwrap();
        receipt.push.unwrap().await.unwrap();
        assert_eq!(fx.push.sent().len(), 1);
        assert_eq!(buyer_events.recv().await.unwrap().message, "hi");

        let mut seller = ChatSession::new(fx.service.clone(), fx.seller.clone(), fx.room.id);
        let mut seller_events = seller.join().await.unwrap();

        let receipt = buyer.handle_text(r#"{"message":"there"}"#).await.unwrap();
        assert!(receipt.push.is_none());

        let expected = ChatEvent {
            message: "there".to_string(),
            sender_id: fx.buyer.id,
        };
        assert_eq!(buyer_events.recv().await.unwrap(), expected);
        assert_eq!(seller_events.recv().await.unwrap(), expected);
        assert_eq!(fx.push.sent().len(), 1);

        seller.close().await;
        buyer.close().await;
    }
}
