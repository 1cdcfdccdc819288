//! 推送通知分发
//!
//! 接收方不在当前房间时，消息发送管线会请求一次推送。推送总是尽力而为：
//! 失败只记录日志，不影响消息本身的持久化和房间广播，也不会重试。
//! 设备已注销时会作废存储的令牌，后续消息不再向它推送。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{PushToken, PushTokenStore, RoomId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

/// 推送通知标题
pub const PUSH_TITLE: &str = "New Message";

/// 推送负载的附加数据，客户端据此跳转到对应聊天室
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushData {
    #[serde(rename = "type")]
    pub kind: String,
    pub chat_room_id: RoomId,
}

/// 发往推送服务的一条通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub to: PushToken,
    pub title: String,
    pub body: String,
    pub sound: String,
    pub data: PushData,
}

impl PushMessage {
    /// 新聊天消息的通知，正文为 "<发送者>: <内容>"
    pub fn chat_message(to: PushToken, sender_name: &str, text: &str, room_id: RoomId) -> Self {
        Self {
            to,
            title: PUSH_TITLE.to_string(),
            body: format!("{sender_name}: {text}"),
            sound: "default".to_string(),
            data: PushData {
                kind: "chat_message".to_string(),
                chat_room_id: room_id,
            },
        }
    }
}

/// 推送服务接受通知后返回的回执
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushTicket {
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    /// 设备令牌已失效，需要作废
    #[error("device not registered")]
    DeviceNotRegistered,
    /// 推送服务返回了错误
    #[error("push server error: {0}")]
    Server(String),
    /// 网络或 HTTP 层错误
    #[error("push transport error: {0}")]
    Transport(String),
    /// 推送服务拒绝了这条通知
    #[error("push ticket error: {0}")]
    Ticket(String),
    #[error("unexpected push error: {0}")]
    Unexpected(String),
}

impl PushError {
    /// 只有设备注销是永久性的，需要清理存储
    pub fn is_permanent(&self) -> bool {
        matches!(self, PushError::DeviceNotRegistered)
    }
}

/// 推送服务客户端
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(&self, message: PushMessage) -> Result<PushTicket, PushError>;
}

/// 一次推送请求
#[derive(Debug, Clone)]
pub struct PushRequest {
    /// 接收方当前的推送令牌，未注册时为 None
    pub destination: Option<PushToken>,
    pub text: String,
    pub sender_name: String,
    pub room_id: RoomId,
}

/// 推送结果，供日志和测试观察
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 接收方没有推送令牌，什么也没做
    NoDestination,
    Delivered,
    /// 设备已注销，令牌已作废
    TokenInvalidated,
    /// 发送失败，已记录日志并放弃
    Dropped(PushError),
}

pub struct NotificationDispatcher {
    provider: Arc<dyn PushProvider>,
    tokens: Arc<dyn PushTokenStore>,
}

impl NotificationDispatcher {
    pub fn new(provider: Arc<dyn PushProvider>, tokens: Arc<dyn PushTokenStore>) -> Self {
        Self { provider, tokens }
    }

    pub async fn dispatch(&self, request: PushRequest) -> DispatchOutcome {
        let Some(token) = request.destination else {
            tracing::debug!(room_id = %request.room_id, "接收方没有推送令牌，跳过推送");
            return DispatchOutcome::NoDestination;
        };

        let message =
            PushMessage::chat_message(token.clone(), &request.sender_name, &request.text, request.room_id);

        match self.provider.send(message).await {
            Ok(ticket) => {
                tracing::debug!(
                    room_id = %request.room_id,
                    token = %token.redacted(),
                    ticket_id = ?ticket.id,
                    "推送通知已发送"
                );
                DispatchOutcome::Delivered
            }
            Err(err) if err.is_permanent() => match self.tokens.clear(token.clone()).await {
                Ok(cleared) => {
                    tracing::info!(
                        token = %token.redacted(),
                        cleared,
                        "设备已注销，作废推送令牌"
                    );
                    DispatchOutcome::TokenInvalidated
                }
                Err(clear_err) => {
                    tracing::warn!(
                        token = %token.redacted(),
                        error = %clear_err,
                        "作废推送令牌失败"
                    );
                    DispatchOutcome::Dropped(err)
                }
            },
            Err(err) => {
                tracing::warn!(
                    room_id = %request.room_id,
                    token = %token.redacted(),
                    error = %err,
                    "推送通知发送失败"
                );
                DispatchOutcome::Dropped(err)
            }
        }
    }

    /// 在后台执行推送，不阻塞调用方
    pub fn spawn(self: &Arc<Self>, request: PushRequest) -> JoinHandle<DispatchOutcome> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.dispatch(request).await })
    }
}
