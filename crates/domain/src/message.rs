use crate::value_objects::{MessageContent, MessageId, RoomId, Timestamp, UserId};

/// 默认分页大小
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// 聊天消息，创建后不可变
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub created_at: Timestamp,
}

/// 待追加的消息，id 由消息存储原子分配
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub created_at: Timestamp,
}

impl NewMessage {
    pub fn into_message(self, id: MessageId) -> Message {
        Message {
            id,
            room_id: self.room_id,
            sender_id: self.sender_id,
            content: self.content,
            created_at: self.created_at,
        }
    }
}
