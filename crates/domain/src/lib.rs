//! 二手交易聊天核心领域模型
//!
//! 包含聊天室（买家/卖家/商品三元组）、消息、商品与用户资料等实体，
//! 以及存储层和外部协作方需要实现的接口。

pub mod chat_room;
pub mod errors;
pub mod listing;
pub mod message;
pub mod repository;
pub mod user;
pub mod value_objects;

pub use chat_room::{ChatRoom, NewChatRoom};
pub use errors::{DomainError, RepositoryError};
pub use listing::Listing;
pub use message::{Message, NewMessage, DEFAULT_PAGE_SIZE};
pub use repository::{
    ChatRoomRepository, ListingRepository, MessageRepository, PushTokenStore, RepositoryFuture,
    RepositoryResult, UserDirectory,
};
pub use user::UserProfile;
pub use value_objects::{
    ListingId, MessageContent, MessageId, PushToken, RoomId, Timestamp, UserId,
};
