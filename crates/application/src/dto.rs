use domain::{Message, RoomId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use time::macros::format_description;

/// 对外展示时间戳的格式，例如 `2024-05-01 13:45:09`
pub fn format_timestamp(value: Timestamp) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    value
        .format(&format)
        .unwrap_or_else(|_| value.unix_timestamp().to_string())
}

/// 历史消息条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: i64,
    pub room: RoomId,
    pub sender: UserId,
    pub sender_name: String,
    pub content: String,
    pub timestamp: String,
}

impl MessageDto {
    pub fn from_message(message: Message, sender_name: impl Into<String>) -> Self {
        Self {
            id: message.id.value(),
            room: message.room_id,
            sender: message.sender_id,
            sender_name: sender_name.into(),
            content: message.content.into_inner(),
            timestamp: format_timestamp(message.created_at),
        }
    }
}

/// 聊天室列表条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummaryDto {
    pub chat_room_id: RoomId,
    pub last_message: String,
    pub last_message_time: String,
    pub other_person_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{MessageContent, MessageId};
    use time::macros::datetime;

    #[test]
    fn message_dto_uses_wire_field_names() {
        let message = Message {
            id: MessageId::new(3),
            room_id: RoomId::new(1),
            sender_id: UserId::new(9),
            content: MessageContent::new("hello").unwrap(),
            created_at: datetime!(2024-05-01 13:45:09 UTC),
        };

        let json = serde_json::to_value(MessageDto::from_message(message, "Bea")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": 3,
                "room": 1,
                "sender": 9,
                "sender_name": "Bea",
                "content": "hello",
                "timestamp": "2024-05-01 13:45:09"
            })
        );
    }
}
