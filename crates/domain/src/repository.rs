use futures::future::BoxFuture;

use crate::chat_room::{ChatRoom, NewChatRoom};
use crate::errors::RepositoryError;
use crate::listing::Listing;
use crate::message::{Message, NewMessage};
use crate::user::UserProfile;
use crate::value_objects::{ListingId, MessageId, PushToken, RoomId, UserId};

pub type RepositoryResult<T> = Result<T, RepositoryError>;
pub type RepositoryFuture<T> = BoxFuture<'static, RepositoryResult<T>>;

pub trait ChatRoomRepository: Send + Sync {
    /// 唯一约束 (listing, buyer) 冲突时返回 `RepositoryError::Conflict`
    fn create(&self, room: NewChatRoom) -> RepositoryFuture<ChatRoom>;
    fn update(&self, room: ChatRoom) -> RepositoryFuture<ChatRoom>;
    fn find_by_id(&self, id: RoomId) -> RepositoryFuture<Option<ChatRoom>>;
    fn find_by_listing_and_buyer(
        &self,
        listing_id: ListingId,
        buyer_id: UserId,
    ) -> RepositoryFuture<Option<ChatRoom>>;
    /// 用户作为买家或卖家参与的所有未关闭聊天室
    fn list_open_for(&self, user_id: UserId) -> RepositoryFuture<Vec<ChatRoom>>;
}

/// 只追加的消息日志
pub trait MessageRepository: Send + Sync {
    /// 原子分配 id 并写入；房间不存在时返回 `RepositoryError::NotFound`
    fn append(&self, message: NewMessage) -> RepositoryFuture<Message>;
    /// 按 id 降序返回，`before` 存在时只返回 id 严格小于它的消息
    fn page(
        &self,
        room_id: RoomId,
        before: Option<MessageId>,
        limit: u32,
    ) -> RepositoryFuture<Vec<Message>>;
    fn latest(&self, room_id: RoomId) -> RepositoryFuture<Option<Message>>;
}

pub trait ListingRepository: Send + Sync {
    fn find_by_id(&self, id: ListingId) -> RepositoryFuture<Option<Listing>>;
}

pub trait UserDirectory: Send + Sync {
    fn find_by_id(&self, id: UserId) -> RepositoryFuture<Option<UserProfile>>;
}

pub trait PushTokenStore: Send + Sync {
    fn get(&self, user_id: UserId) -> RepositoryFuture<Option<PushToken>>;
    fn set(&self, user_id: UserId, token: PushToken) -> RepositoryFuture<()>;
    /// 作废所有持有该令牌的资料，返回受影响的数量
    fn clear(&self, token: PushToken) -> RepositoryFuture<u64>;
}
