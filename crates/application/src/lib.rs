//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例：消息发送管线、聊天室注册表、在线状态、
//! 房间广播组、推送通知分发以及单个连接的会话状态机。

pub mod broadcaster;
pub mod clock;
pub mod dto;
pub mod error;
pub mod local_broadcast;
pub mod memory;
pub mod notification;
pub mod presence;
pub mod services;
pub mod session;

pub use broadcaster::{BroadcastError, BroadcastGroup, ChatEvent, RoomSubscription, SessionId};
pub use clock::{Clock, SystemClock};
pub use dto::{MessageDto, RoomSummaryDto};
pub use error::ApplicationError;
pub use local_broadcast::LocalBroadcastGroup;
pub use notification::{
    DispatchOutcome, NotificationDispatcher, PushError, PushMessage, PushProvider, PushRequest,
    PushTicket,
};
pub use presence::{InMemoryPresenceRegistry, PresenceRegistry};
pub use services::{
    ChatRoomService, ChatRoomServiceDependencies, ChatService, ChatServiceDependencies,
    ResolvedRoom, RoomResolution, SendMessageRequest, SendReceipt,
};
pub use session::{ChatSession, SessionState};
