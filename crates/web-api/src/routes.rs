use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        ws::WebSocketUpgrade,
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use application::{ChatSession, MessageDto, RoomResolution, RoomSummaryDto};
use domain::{DomainError, ListingId, MessageId, RoomId};

use crate::{auth::AuthUser, error::ApiError, state::AppState, ws_connection::WebSocketConnection};

/// 成功响应 `{"success": true, "message"?: ..., "data"?: ...}`
#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    fn data(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    fn with_message(message: &'static str, data: T) -> Self {
        Self {
            success: true,
            message: Some(message),
            data: Some(data),
        }
    }
}

impl Envelope<()> {
    fn message(message: &'static str) -> Self {
        Self {
            success: true,
            message: Some(message),
            data: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateRoomPayload {
    gig: Option<i64>,
}

#[derive(Debug, Serialize)]
struct RoomIdData {
    chat_room_id: RoomId,
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    last_message_id: Option<String>,
}

impl MessagesQuery {
    /// 空字符串等同于没有游标
    fn cursor(&self) -> Result<Option<MessageId>, ApiError> {
        match self.last_message_id.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse::<i64>()
                .map(|id| Some(MessageId::new(id)))
                .map_err(|_| {
                    ApiError::bad_request("last_message_id: A valid integer is required.")
                }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PushTokenPayload {
    push_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotificationSettingsPayload {
    chat_room_id: Option<i64>,
    notifications_enabled: Option<bool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chatrooms/", get(list_rooms))
        .route("/chatrooms/create/", post(create_room))
        .route("/chatrooms/{room_id}/messages/", get(room_messages))
        .route("/chatrooms/{room_id}/close/", post(close_room))
        .route("/update-push-token/", post(update_push_token))
        .route(
            "/update-notification-settings/",
            post(update_notification_settings),
        )
        .route("/ws/chat/{room_id}/", get(websocket_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn list_rooms(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Envelope<Vec<RoomSummaryDto>>>, ApiError> {
    let rooms = state.room_service.list_open_for(user.id).await?;
    Ok(Json(Envelope::data(rooms)))
}

async fn create_room(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<CreateRoomPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    let gig = payload
        .gig
        .ok_or_else(|| ApiError::bad_request("gig: This field is required."))?;

    let resolved = state
        .room_service
        .resolve_or_create(ListingId::new(gig), user.id)
        .await?;
    let data = RoomIdData {
        chat_room_id: resolved.room.id,
    };

    let response = match resolved.resolution {
        RoomResolution::Created => (StatusCode::CREATED, Json(Envelope::data(data))).into_response(),
        RoomResolution::Reopened => Json(Envelope::with_message(
            "Chat room reopened successfully.",
            data,
        ))
        .into_response(),
        RoomResolution::AlreadyOpen => {
            Json(Envelope::with_message("Chat room already open.", data)).into_response()
        }
    };
    Ok(response)
}

async fn room_messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    room_id: Result<Path<i64>, PathRejection>,
    query: Result<Query<MessagesQuery>, QueryRejection>,
) -> Result<Json<Envelope<Vec<MessageDto>>>, ApiError> {
    let Path(room_id) = room_id?;
    let Query(query) = query?;
    let messages = state
        .room_service
        .messages(RoomId::new(room_id), user.id, query.cursor()?, None)
        .await?;
    Ok(Json(Envelope::data(messages)))
}

async fn close_room(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    room_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Envelope<()>>, ApiError> {
    let Path(room_id) = room_id?;
    state
        .room_service
        .close(RoomId::new(room_id), user.id)
        .await
        .map_err(|err| match ApiError::from(err) {
            forbidden if forbidden.status() == StatusCode::FORBIDDEN => ApiError::new(
                StatusCode::FORBIDDEN,
                forbidden.code(),
                "You are not authorized to close this chat room.",
            ),
            other => other,
        })?;
    Ok(Json(Envelope::message("Chat room closed successfully.")))
}

async fn update_push_token(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<PushTokenPayload>, JsonRejection>,
) -> Result<Json<Envelope<()>>, ApiError> {
    let Json(payload) = payload?;
    state
        .room_service
        .update_push_token(user.id, payload.push_token)
        .await
        .map_err(|err| match err {
            application::ApplicationError::Domain(DomainError::InvalidArgument { .. }) => {
                ApiError::bad_request("Push token is required")
            }
            other => other.into(),
        })?;
    Ok(Json(Envelope::message("Push token updated successfully")))
}

/// 只做校验并确认，偏好本身不落库
async fn update_notification_settings(
    AuthUser(user): AuthUser,
    payload: Result<Json<NotificationSettingsPayload>, JsonRejection>,
) -> Result<Json<Envelope<()>>, ApiError> {
    let Json(payload) = payload?;
    let (Some(chat_room_id), Some(enabled)) = (payload.chat_room_id, payload.notifications_enabled)
    else {
        return Err(ApiError::bad_request(
            "Both chat_room_id and notifications_enabled are required",
        ));
    };

    tracing::info!(
        user_id = %user.id,
        room_id = chat_room_id,
        notifications_enabled = enabled,
        "收到通知设置"
    );
    Ok(Json(Envelope::message(
        "Notification settings updated successfully",
    )))
}

/// 升级前完成认证和加入房间，失败直接返回 HTTP 错误
async fn websocket_upgrade(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    room_id: Result<Path<i64>, PathRejection>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let Path(room_id) = room_id?;
    let mut session = ChatSession::new(state.chat_service.clone(), user, RoomId::new(room_id));
    let subscription = session.join().await?;

    let connection = WebSocketConnection::new(session, subscription);
    Ok(ws.on_upgrade(move |socket| connection.run(socket)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use application::{
        memory::{MemoryStore, RecordingPushProvider},
        ChatRoomService, ChatRoomServiceDependencies, ChatService, ChatServiceDependencies,
        InMemoryPresenceRegistry, LocalBroadcastGroup, NotificationDispatcher, SystemClock,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request},
    };
    use config::JwtConfig;
    use domain::UserId;
    use tower::ServiceExt;

    use crate::JwtService;

    fn app(store: &MemoryStore) -> (Router, Arc<JwtService>) {
        let store_arc = Arc::new(store.clone());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::new(RecordingPushProvider::new()),
            store_arc.clone(),
        ));
        let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
            room_repository: store_arc.clone(),
            message_repository: store_arc.clone(),
            push_tokens: store_arc.clone(),
            presence: Arc::new(InMemoryPresenceRegistry::new()),
            broadcaster: Arc::new(LocalBroadcastGroup::new(16)),
            dispatcher,
            clock: Arc::new(SystemClock),
        }));
        let room_service = Arc::new(ChatRoomService::new(ChatRoomServiceDependencies {
            room_repository: store_arc.clone(),
            message_repository: store_arc.clone(),
            listing_repository: store_arc.clone(),
            user_directory: store_arc.clone(),
            push_tokens: store_arc.clone(),
            clock: Arc::new(SystemClock),
        }));
        let jwt = Arc::new(JwtService::new(JwtConfig {
            secret: "routes-test-secret-with-enough-characters".to_string(),
            expiration_hours: 1,
        }));
        let state = AppState::new(chat_service, room_service, jwt.clone(), store_arc);
        (router(state), jwt)
    }

    fn post_json(uri: &str, token: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let (app, _) = app(&MemoryStore::new());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let (app, _) = app(&MemoryStore::new());
        let response = app
            .oneshot(Request::get("/chatrooms/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["success"], false);
    }

    #[tokio::test]
    async fn token_for_unknown_user_is_unauthorized() {
        let (app, jwt) = app(&MemoryStore::new());
        let token = jwt.generate_token(UserId::new(99)).unwrap();
        let response = app
            .oneshot(
                Request::get("/chatrooms/")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_room_id_gets_error_envelope() {
        let store = MemoryStore::new();
        let buyer = store.add_user(1, "Bob");
        let (app, jwt) = app(&store);
        let token = jwt.generate_token(buyer.id).unwrap();

        let messages = app
            .clone()
            .oneshot(
                Request::get("/chatrooms/abc/messages/")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(messages.status(), StatusCode::NOT_FOUND);
        let body = json_body(messages).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "NOT_FOUND");

        let close = app
            .oneshot(post_json("/chatrooms/abc/close/", &token, ""))
            .await
            .unwrap();
        assert_eq!(close.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(close).await["success"], false);
    }

    #[tokio::test]
    async fn create_requires_gig() {
        let store = MemoryStore::new();
        let buyer = store.add_user(1, "Bob");
        let (app, jwt) = app(&store);
        let token = jwt.generate_token(buyer.id).unwrap();

        let response = app
            .oneshot(post_json("/chatrooms/create/", &token, "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_then_reopen_reports_resolution() {
        let store = MemoryStore::new();
        let buyer = store.add_user(1, "Bob");
        let seller = store.add_user(2, "Sara");
        store.add_listing(10, "Road bike", seller.id);
        let (app, jwt) = app(&store);
        let buyer_token = jwt.generate_token(buyer.id).unwrap();

        let created = app
            .clone()
            .oneshot(post_json("/chatrooms/create/", &buyer_token, r#"{"gig": 10}"#))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let room_id = json_body(created).await["data"]["chat_room_id"].as_i64().unwrap();

        let again = app
            .clone()
            .oneshot(post_json("/chatrooms/create/", &buyer_token, r#"{"gig": 10}"#))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::OK);
        assert_eq!(json_body(again).await["message"], "Chat room already open.");

        let closed = app
            .clone()
            .oneshot(post_json(
                &format!("/chatrooms/{room_id}/close/"),
                &buyer_token,
                "",
            ))
            .await
            .unwrap();
        assert_eq!(closed.status(), StatusCode::OK);

        let reopened = app
            .oneshot(post_json("/chatrooms/create/", &buyer_token, r#"{"gig": 10}"#))
            .await
            .unwrap();
        assert_eq!(reopened.status(), StatusCode::OK);
        let body = json_body(reopened).await;
        assert_eq!(body["message"], "Chat room reopened successfully.");
        assert_eq!(body["data"]["chat_room_id"], room_id);
    }

    #[tokio::test]
    async fn outsider_cannot_close_room() {
        let store = MemoryStore::new();
        let buyer = store.add_user(1, "Bob");
        let seller = store.add_user(2, "Sara");
        let outsider = store.add_user(3, "Eve");
        store.add_listing(10, "Road bike", seller.id);
        let (app, jwt) = app(&store);

        let created = app
            .clone()
            .oneshot(post_json(
                "/chatrooms/create/",
                &jwt.generate_token(buyer.id).unwrap(),
                r#"{"gig": 10}"#,
            ))
            .await
            .unwrap();
        let room_id = json_body(created).await["data"]["chat_room_id"].as_i64().unwrap();

        let response = app
            .oneshot(post_json(
                &format!("/chatrooms/{room_id}/close/"),
                &jwt.generate_token(outsider.id).unwrap(),
                "",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            json_body(response).await["error"],
            "You are not authorized to close this chat room."
        );
    }

    #[tokio::test]
    async fn push_token_must_not_be_blank() {
        let store = MemoryStore::new();
        let user = store.add_user(1, "Bob");
        let (app, jwt) = app(&store);
        let token = jwt.generate_token(user.id).unwrap();

        let response = app
            .clone()
            .oneshot(post_json("/update-push-token/", &token, r#"{"push_token": ""}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Push token is required");

        let response = app
            .oneshot(post_json(
                "/update-push-token/",
                &token,
                r#"{"push_token": "ExponentPushToken[abc]"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            store.push_token(user.id).map(|t| t.as_str().to_string()),
            Some("ExponentPushToken[abc]".to_string())
        );
    }

    #[tokio::test]
    async fn notification_settings_need_both_fields() {
        let store = MemoryStore::new();
        let user = store.add_user(1, "Bob");
        let (app, jwt) = app(&store);
        let token = jwt.generate_token(user.id).unwrap();

        let response = app
            .clone()
            .oneshot(post_json(
                "/update-notification-settings/",
                &token,
                r#"{"chat_room_id": 1}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(post_json(
                "/update-notification-settings/",
                &token,
                r#"{"chat_room_id": 1, "notifications_enabled": false}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
