use std::sync::Arc;

use application::{ChatRoomService, ChatService};
use domain::UserDirectory;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
    pub room_service: Arc<ChatRoomService>,
    pub jwt_service: Arc<JwtService>,
    /// 认证后解析用户资料
    pub users: Arc<dyn UserDirectory>,
}

impl AppState {
    pub fn new(
        chat_service: Arc<ChatService>,
        room_service: Arc<ChatRoomService>,
        jwt_service: Arc<JwtService>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            chat_service,
            room_service,
            jwt_service,
            users,
        }
    }
}
