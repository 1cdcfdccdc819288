use std::sync::Arc;

use domain::{
    ChatRoom, ChatRoomRepository, DomainError, ListingId, ListingRepository, MessageId,
    MessageRepository, NewChatRoom, PushToken, PushTokenStore, RepositoryError, RoomId,
    UserDirectory, UserId, DEFAULT_PAGE_SIZE,
};

use crate::{
    clock::Clock,
    dto::{format_timestamp, MessageDto, RoomSummaryDto},
    error::ApplicationError,
};

/// 没有消息时列表里展示的文案
pub const NO_MESSAGES_YET: &str = "No messages yet";

const UNKNOWN_USER: &str = "Unknown user";

/// `resolve_or_create` 的结果类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomResolution {
    Created,
    Reopened,
    AlreadyOpen,
}

#[derive(Debug, Clone)]
pub struct ResolvedRoom {
    pub room: ChatRoom,
    pub resolution: RoomResolution,
}

pub struct ChatRoomServiceDependencies {
    pub room_repository: Arc<dyn ChatRoomRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub listing_repository: Arc<dyn ListingRepository>,
    pub user_directory: Arc<dyn UserDirectory>,
    pub push_tokens: Arc<dyn PushTokenStore>,
    pub clock: Arc<dyn Clock>,
}

/// 聊天室注册表以及围绕聊天室的查询
pub struct ChatRoomService {
    deps: ChatRoomServiceDependencies,
}

impl ChatRoomService {
    pub fn new(deps: ChatRoomServiceDependencies) -> Self {
        Self { deps }
    }

    /// 找到 (商品, 买家) 对应的聊天室，关闭的会被重新打开，不存在则新建
    pub async fn resolve_or_create(
        &self,
        listing_id: ListingId,
        buyer_id: UserId,
    ) -> Result<ResolvedRoom, ApplicationError> {
        let listing = self
            .deps
            .listing_repository
            .find_by_id(listing_id)
            .await?
            .ok_or(DomainError::ListingNotFound)?;

        let new_room = NewChatRoom::for_listing(&listing, buyer_id, self.deps.clock.now())?;

        if let Some(existing) = self
            .deps
            .room_repository
            .find_by_listing_and_buyer(listing_id, buyer_id)
            .await?
        {
            return self.reopen_if_closed(existing).await;
        }

        match self.deps.room_repository.create(new_room).await {
            Ok(room) => {
                tracing::info!(
                    room_id = %room.id,
                    listing_id = %listing_id,
                    buyer_id = %buyer_id,
                    seller_id = %room.seller_id,
                    "创建聊天室"
                );
                Ok(ResolvedRoom {
                    room,
                    resolution: RoomResolution::Created,
                })
            }
            // 并发请求已经抢先创建
            Err(RepositoryError::Conflict) => {
                let existing = self
                    .deps
                    .room_repository
                    .find_by_listing_and_buyer(listing_id, buyer_id)
                    .await?
                    .ok_or(RepositoryError::Conflict)?;
                self.reopen_if_closed(existing).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn reopen_if_closed(&self, mut room: ChatRoom) -> Result<ResolvedRoom, ApplicationError> {
        if !room.is_closed {
            return Ok(ResolvedRoom {
                room,
                resolution: RoomResolution::AlreadyOpen,
            });
        }

        room.reopen();
        let room = self.deps.room_repository.update(room).await?;
        tracing::info!(room_id = %room.id, "重新打开聊天室");
        Ok(ResolvedRoom {
            room,
            resolution: RoomResolution::Reopened,
        })
    }

    /// 用户必须是聊天室的买家或卖家
    pub async fn authorize(&self, room_id: RoomId, user_id: UserId) -> Result<ChatRoom, ApplicationError> {
        let room = self
            .deps
            .room_repository
            .find_by_id(room_id)
            .await?
            .ok_or(DomainError::RoomNotFound)?;
        room.ensure_participant(user_id)?;
        Ok(room)
    }

    /// 不存在和已关闭都按 `RoomClosed` 处理
    pub async fn close(&self, room_id: RoomId, user_id: UserId) -> Result<ChatRoom, ApplicationError> {
        let mut room = self.open_room(room_id).await?;
        room.ensure_participant(user_id)?;

        room.close();
        let room = self.deps.room_repository.update(room).await?;
        tracing::info!(room_id = %room.id, user_id = %user_id, "关闭聊天室");
        Ok(room)
    }

    pub async fn list_open_for(&self, user_id: UserId) -> Result<Vec<RoomSummaryDto>, ApplicationError> {
        let rooms = self.deps.room_repository.list_open_for(user_id).await?;

        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms {
            let other_person_name = match room.other_participant(user_id) {
                Some(other) => self.display_name(other).await?,
                None => UNKNOWN_USER.to_string(),
            };

            let summary = match self.deps.message_repository.latest(room.id).await? {
                Some(message) => RoomSummaryDto {
                    chat_room_id: room.id,
                    last_message: message.content.into_inner(),
                    last_message_time: format_timestamp(message.created_at),
                    other_person_name,
                },
                None => RoomSummaryDto {
                    chat_room_id: room.id,
                    last_message: NO_MESSAGES_YET.to_string(),
                    last_message_time: format_timestamp(room.created_at),
                    other_person_name,
                },
            };
            summaries.push(summary);
        }

        Ok(summaries)
    }

    /// 按 id 降序返回一页历史消息
    pub async fn messages(
        &self,
        room_id: RoomId,
        user_id: UserId,
        before: Option<MessageId>,
        limit: Option<u32>,
    ) -> Result<Vec<MessageDto>, ApplicationError> {
        let room = self.open_room(room_id).await?;
        room.ensure_participant(user_id)?;

        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, DEFAULT_PAGE_SIZE);
        let messages = self
            .deps
            .message_repository
            .page(room.id, before, limit)
            .await?;

        let buyer_name = self.display_name(room.buyer_id).await?;
        let seller_name = self.display_name(room.seller_id).await?;

        Ok(messages
            .into_iter()
            .map(|message| {
                let name = if message.sender_id == room.buyer_id {
                    buyer_name.clone()
                } else {
                    seller_name.clone()
                };
                MessageDto::from_message(message, name)
            })
            .collect())
    }

    pub async fn update_push_token(
        &self,
        user_id: UserId,
        push_token: Option<String>,
    ) -> Result<PushToken, ApplicationError> {
        let token = PushToken::parse(push_token.unwrap_or_default())?;
        self.deps.push_tokens.set(user_id, token.clone()).await?;
        tracing::info!(user_id = %user_id, token = %token.redacted(), "更新推送令牌");
        Ok(token)
    }

    async fn open_room(&self, room_id: RoomId) -> Result<ChatRoom, ApplicationError> {
        match self.deps.room_repository.find_by_id(room_id).await? {
            Some(room) if !room.is_closed => Ok(room),
            _ => Err(DomainError::RoomClosed.into()),
        }
    }

    async fn display_name(&self, user_id: UserId) -> Result<String, ApplicationError> {
        Ok(self
            .deps
            .user_directory
            .find_by_id(user_id)
            .await?
            .map(|user| user.name)
            .unwrap_or_else(|| UNKNOWN_USER.to_string()))
    }
}
