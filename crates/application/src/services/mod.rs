mod chat_room_service;
mod chat_service;

pub use chat_room_service::{
    ChatRoomService, ChatRoomServiceDependencies, ResolvedRoom, RoomResolution, NO_MESSAGES_YET,
};
pub use chat_service::{ChatService, ChatServiceDependencies, SendMessageRequest, SendReceipt};
