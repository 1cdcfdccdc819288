use application::{ChatSession, RoomSubscription};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::error::ApiError;

/// WebSocket 连接
///
/// 驱动一个已经加入房间的 `ChatSession`：
/// - 房间广播转发给客户端
/// - 客户端文本帧交给会话发送
/// - Ping/Pong 心跳
/// - 断开时释放会话
pub struct WebSocketConnection {
    session: ChatSession,
    subscription: RoomSubscription,
}

impl WebSocketConnection {
    /// `session` 必须已经 `join` 成功，`subscription` 是 join 的返回值
    pub fn new(session: ChatSession, subscription: RoomSubscription) -> Self {
        Self {
            session,
            subscription,
        }
    }

    /// 运行连接主循环，直到任意一端结束
    pub async fn run(self, socket: WebSocket) {
        let Self {
            mut session,
            mut subscription,
        } = self;

        tracing::info!(
            session_id = %session.id(),
            user_id = %session.user().id,
            room_id = %session.room_id(),
            "WebSocket 连接已建立"
        );

        let (mut sender, mut incoming) = socket.split();

        // 创建 mpsc channel 来解耦对 sender 的访问
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        // 发送任务：统一处理所有对 WebSocket sender 的写操作
        let mut send_task = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        WsCommand::SendText(text) => WsMessage::Text(text.into()),
                        WsCommand::SendPong(data) => WsMessage::Pong(data.into()),
                    },
                    event = subscription.recv() => match event {
                        Some(event) => match serde_json::to_string(&event) {
                            Ok(json) => WsMessage::Text(json.into()),
                            Err(err) => {
                                tracing::warn!(error = %err, "failed to serialize websocket payload");
                                continue;
                            }
                        },
                        None => {
                            tracing::info!("房间订阅已关闭");
                            break;
                        }
                    },
                };

                if sender.send(frame).await.is_err() {
                    tracing::warn!("Failed to send websocket frame");
                    break;
                }
            }
            tracing::info!("WebSocket发送任务结束");
        });

        // 接收循环：处理来自客户端的消息
        {
            let recv_loop = async {
                while let Some(Ok(message)) = incoming.next().await {
                    if Self::handle_incoming(&session, message, &cmd_tx).await.is_err() {
                        break;
                    }
                }
                tracing::info!("WebSocket接收任务结束");
            };

            // 等待任意一方完成（连接断开）
            tokio::select! {
                _ = &mut send_task => {
                    tracing::info!("WebSocket发送任务完成");
                }
                _ = recv_loop => {
                    tracing::info!("WebSocket接收任务完成");
                }
            }
        }

        send_task.abort();

        // 连接断开时释放在线状态和广播组成员身份
        session.close().await;

        tracing::info!(
            session_id = %session.id(),
            user_id = %session.user().id,
            room_id = %session.room_id(),
            "WebSocket连接已断开，在线状态已清理"
        );
    }

    /// 处理来自客户端的消息
    ///
    /// 返回 `Err` 表示应当结束连接
    async fn handle_incoming(
        session: &ChatSession,
        message: WsMessage,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> Result<(), ()> {
        match message {
            WsMessage::Close(_) => {
                tracing::info!("WebSocket收到关闭消息");
                return Err(());
            }
            WsMessage::Ping(data) => {
                tracing::debug!("收到ping消息，发送pong回应");
                if cmd_tx
                    .send(WsCommand::SendPong(data.to_vec()))
                    .await
                    .is_err()
                {
                    tracing::warn!("Failed to send pong command");
                    return Err(());
                }
            }
            WsMessage::Pong(_) => {
                tracing::debug!("收到pong消息");
            }
            WsMessage::Text(text) => {
                // 推送任务在后台运行，这里不等待它
                if let Err(err) = session.handle_text(text.as_str()).await {
                    let err = ApiError::from(err);
                    tracing::warn!(
                        session_id = %session.id(),
                        code = err.code(),
                        error = err.message(),
                        "消息发送失败"
                    );
                    if cmd_tx
                        .send(WsCommand::SendText(err.to_ws_frame()))
                        .await
                        .is_err()
                    {
                        return Err(());
                    }
                }
            }
            WsMessage::Binary(_) => {
                tracing::debug!("忽略二进制消息");
            }
        }
        Ok(())
    }
}

/// WebSocket 写操作命令
///
/// 使用命令模式统一管理所有对 WebSocket sender 的写操作
#[derive(Debug)]
enum WsCommand {
    SendText(String),
    SendPong(Vec<u8>),
}
