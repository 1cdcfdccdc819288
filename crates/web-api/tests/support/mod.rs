#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    memory::{MemoryStore, RecordingPushProvider},
    ChatRoomService, ChatRoomServiceDependencies, ChatService, ChatServiceDependencies,
    InMemoryPresenceRegistry, LocalBroadcastGroup, NotificationDispatcher, SystemClock,
};
use domain::{RoomId, UserId};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, JwtConfig, JwtService};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 绑定在随机端口上的完整服务，底层全部使用内存实现
pub struct TestApp {
    pub addr: SocketAddr,
    pub store: MemoryStore,
    pub push: RecordingPushProvider,
    pub presence: Arc<InMemoryPresenceRegistry>,
    pub jwt: Arc<JwtService>,
    pub client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let store = MemoryStore::new();
        let push = RecordingPushProvider::new();
        let presence = Arc::new(InMemoryPresenceRegistry::new());
        let storage = Arc::new(store.clone());

        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::new(push.clone()),
            storage.clone(),
        ));
        let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
            room_repository: storage.clone(),
            message_repository: storage.clone(),
            push_tokens: storage.clone(),
            presence: presence.clone(),
            broadcaster: Arc::new(LocalBroadcastGroup::new(64)),
            dispatcher,
            clock: Arc::new(SystemClock),
        }));
        let room_service = Arc::new(ChatRoomService::new(ChatRoomServiceDependencies {
            room_repository: storage.clone(),
            message_repository: storage.clone(),
            listing_repository: storage.clone(),
            user_directory: storage.clone(),
            push_tokens: storage.clone(),
            clock: Arc::new(SystemClock),
        }));
        let jwt = Arc::new(JwtService::new(JwtConfig {
            secret: "integration-test-secret-with-32-plus-chars".to_string(),
            expiration_hours: 1,
        }));

        let state = AppState::new(chat_service, room_service, jwt.clone(), storage);
        let app = router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            store,
            push,
            presence,
            jwt,
            client: reqwest::Client::new(),
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn token(&self, user_id: UserId) -> String {
        self.jwt.generate_token(user_id).expect("token")
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, room_id: RoomId, token: &str) -> String {
        format!("ws://{}/ws/chat/{}/?token={}", self.addr, room_id, token)
    }

    pub async fn connect(&self, room_id: RoomId, user_id: UserId) -> WsStream {
        let (stream, _) = connect_async(self.ws_url(room_id, &self.token(user_id)))
            .await
            .expect("websocket connect");
        stream
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// 读取下一条文本帧并解析为 JSON，跳过控制帧
pub async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("websocket frame");
        if let TungsteniteMessage::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("json frame");
        }
    }
}

/// 在给定时间内没有任何文本帧
pub async fn assert_silent(ws: &mut WsStream, wait: Duration) {
    if let Ok(Some(Ok(TungsteniteMessage::Text(text)))) = timeout(wait, ws.next()).await {
        panic!("unexpected frame: {}", text.as_str());
    }
}
