use std::fmt;

use async_trait::async_trait;
use domain::{RoomId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// 单个 WebSocket 连接的标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 房间内广播的事件，序列化后就是发给客户端的帧
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub message: String,
    pub sender_id: UserId,
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 会话在某个房间里的订阅
pub struct RoomSubscription {
    pub room_id: RoomId,
    pub session_id: SessionId,
    receiver: mpsc::Receiver<ChatEvent>,
}

impl RoomSubscription {
    pub fn new(room_id: RoomId, session_id: SessionId, receiver: mpsc::Receiver<ChatEvent>) -> Self {
        Self {
            room_id,
            session_id,
            receiver,
        }
    }

    /// 等待下一条事件；成员被移出房间后返回 None
    pub async fn recv(&mut self) -> Option<ChatEvent> {
        self.receiver.recv().await
    }

    /// 不等待，缓冲里没有事件时返回 None
    pub fn try_recv(&mut self) -> Option<ChatEvent> {
        self.receiver.try_recv().ok()
    }
}

/// 房间广播组
///
/// 同一房间内事件按发布顺序到达每个成员。
#[async_trait]
pub trait BroadcastGroup: Send + Sync {
    async fn join(&self, room_id: RoomId, session_id: SessionId) -> Result<RoomSubscription, BroadcastError>;

    /// 不是成员时什么也不做
    async fn leave(&self, room_id: RoomId, session_id: SessionId) -> Result<(), BroadcastError>;

    /// 返回实际投递到的成员数量
    async fn publish(&self, room_id: RoomId, event: ChatEvent) -> Result<usize, BroadcastError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_event_serializes_to_outbound_frame() {
        let event = ChatEvent {
            message: "hello".to_string(),
            sender_id: UserId::new(7),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, serde_json::json!({ "message": "hello", "sender_id": 7 }));
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
