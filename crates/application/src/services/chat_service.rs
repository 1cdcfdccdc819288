use std::sync::Arc;

use domain::{
    ChatRoom, ChatRoomRepository, DomainError, Message, MessageContent, MessageRepository,
    NewMessage, PushTokenStore, RepositoryError, RoomId, UserId, UserProfile,
};
use tokio::task::JoinHandle;

use crate::{
    broadcaster::{BroadcastGroup, ChatEvent},
    clock::Clock,
    error::ApplicationError,
    notification::{DispatchOutcome, NotificationDispatcher, PushRequest},
    presence::PresenceRegistry,
};

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub room_id: RoomId,
    pub sender: UserProfile,
    pub content: String,
}

/// 发送结果
///
/// 消息已持久化即视为发送成功；推送和广播的结果只用于观察。
#[derive(Debug)]
pub struct SendReceipt {
    pub message: Message,
    /// 接收方不在房间时启动的后台推送任务
    pub push: Option<JoinHandle<DispatchOutcome>>,
    /// 实时投递到的会话数量（包括发送者自己）
    pub delivered_live: usize,
}

pub struct ChatServiceDependencies {
    pub room_repository: Arc<dyn ChatRoomRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub push_tokens: Arc<dyn PushTokenStore>,
    pub presence: Arc<dyn PresenceRegistry>,
    pub broadcaster: Arc<dyn BroadcastGroup>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub clock: Arc<dyn Clock>,
}

/// 消息发送管线：持久化 -> 在线状态检查 -> 推送 -> 房间广播
pub struct ChatService {
    deps: ChatServiceDependencies,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self { deps }
    }

    pub fn presence(&self) -> &Arc<dyn PresenceRegistry> {
        &self.deps.presence
    }

    pub fn broadcaster(&self) -> &Arc<dyn BroadcastGroup> {
        &self.deps.broadcaster
    }

    /// 校验用户能否连接到房间：房间存在、未关闭且用户是参与者
    pub async fn authorize_connection(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<ChatRoom, ApplicationError> {
        let room = self.open_room(room_id).await?;
        room.ensure_participant(user_id)?;
        Ok(room)
    }

    async fn open_room(&self, room_id: RoomId) -> Result<ChatRoom, ApplicationError> {
        let room = self
            .deps
            .room_repository
            .find_by_id(room_id)
            .await?
            .ok_or(DomainError::RoomNotFound)?;

        if room.is_closed {
            return Err(DomainError::RoomClosed.into());
        }
        Ok(room)
    }

    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<SendReceipt, ApplicationError> {
        let content = MessageContent::new(request.content)?;
        let sender = request.sender;

        let room = self.open_room(request.room_id).await?;
        let recipient_id = room
            .other_participant(sender.id)
            .ok_or(DomainError::NotParticipant)?;

        let message = self
            .deps
            .message_repository
            .append(NewMessage {
                room_id: room.id,
                sender_id: sender.id,
                content,
                created_at: self.deps.clock.now(),
            })
            .await
            .map_err(|err| match err {
                RepositoryError::NotFound => ApplicationError::from(DomainError::RoomNotFound),
                other => other.into(),
            })?;

        tracing::debug!(
            room_id = %room.id,
            message_id = %message.id,
            sender_id = %sender.id,
            "消息已持久化"
        );

        let push = if self.recipient_is_viewing(recipient_id, room.id).await {
            None
        } else {
            let destination = match self.deps.push_tokens.get(recipient_id).await {
                Ok(token) => token,
                Err(err) => {
                    tracing::warn!(user_id = %recipient_id, error = %err, "读取推送令牌失败");
                    None
                }
            };
            Some(self.deps.dispatcher.spawn(PushRequest {
                destination,
                text: message.content.as_str().to_string(),
                sender_name: sender.notification_name().to_string(),
                room_id: room.id,
            }))
        };

        let event = ChatEvent {
            message: message.content.as_str().to_string(),
            sender_id: sender.id,
        };
        let delivered_live = match self.deps.broadcaster.publish(room.id, event).await {
            Ok(delivered) => delivered,
            Err(err) => {
                // 消息已经落库，客户端刷新历史时可见
                tracing::error!(
                    room_id = %room.id,
                    message_id = %message.id,
                    error = %err,
                    "消息已保存到数据库，但广播失败"
                );
                0
            }
        };

        Ok(SendReceipt {
            message,
            push,
            delivered_live,
        })
    }

    async fn recipient_is_viewing(&self, recipient_id: UserId, room_id: RoomId) -> bool {
        match self.deps.presence.is_active_in(recipient_id, room_id).await {
            Ok(active) => active,
            Err(err) => {
                tracing::warn!(user_id = %recipient_id, error = %err, "查询在线状态失败，按离线处理");
                false
            }
        }
    }
}
