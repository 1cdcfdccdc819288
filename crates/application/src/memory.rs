//! 内存实现
//!
//! 单进程运行和测试使用的存储与推送替身。所有状态放在一把互斥锁后面，
//! 追加消息时 id 分配与写入在同一个临界区内完成。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use domain::{
    ChatRoom, ChatRoomRepository, Listing, ListingId, ListingRepository, Message, MessageId,
    MessageRepository, NewChatRoom, NewMessage, PushToken, PushTokenStore, RepositoryError,
    RepositoryFuture, RoomId, UserDirectory, UserId, UserProfile,
};

use crate::notification::{PushError, PushMessage, PushProvider, PushTicket};

#[derive(Default)]
struct State {
    users: HashMap<UserId, UserProfile>,
    listings: HashMap<ListingId, Listing>,
    rooms: BTreeMap<RoomId, ChatRoom>,
    messages: Vec<Message>,
    push_tokens: HashMap<UserId, PushToken>,
    last_room_id: i64,
    last_message_id: i64,
    append_failure: Option<RepositoryError>,
}

/// 同时实现聊天室、消息、商品、用户和推送令牌存储
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_user(&self, id: i64, name: &str) -> UserProfile {
        let profile = UserProfile::new(UserId::new(id), name);
        self.lock().users.insert(profile.id, profile.clone());
        profile
    }

    pub fn add_listing(&self, id: i64, title: &str, owner_id: UserId) -> Listing {
        let listing = Listing {
            id: ListingId::new(id),
            title: title.to_string(),
            owner_id,
        };
        self.lock().listings.insert(listing.id, listing.clone());
        listing
    }

    pub fn set_push_token(&self, user_id: UserId, token: PushToken) {
        self.lock().push_tokens.insert(user_id, token);
    }

    pub fn push_token(&self, user_id: UserId) -> Option<PushToken> {
        self.lock().push_tokens.get(&user_id).cloned()
    }

    /// 之后的每次追加消息都返回该错误，传 None 恢复正常
    pub fn fail_appends_with(&self, error: Option<RepositoryError>) {
        self.lock().append_failure = error;
    }

    pub fn room(&self, room_id: RoomId) -> Option<ChatRoom> {
        self.lock().rooms.get(&room_id).cloned()
    }

    /// 某个房间的全部消息，按 id 升序
    pub fn messages_in(&self, room_id: RoomId) -> Vec<Message> {
        self.lock()
            .messages
            .iter()
            .filter(|message| message.room_id == room_id)
            .cloned()
            .collect()
    }
}

impl ChatRoomRepository for MemoryStore {
    fn create(&self, room: NewChatRoom) -> RepositoryFuture<ChatRoom> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.lock();
            let duplicate = state
                .rooms
                .values()
                .any(|existing| existing.listing_id == room.listing_id && existing.buyer_id == room.buyer_id);
            if duplicate {
                return Err(RepositoryError::Conflict);
            }

            state.last_room_id += 1;
            let room = room.into_room(RoomId::new(state.last_room_id));
            state.rooms.insert(room.id, room.clone());
            Ok(room)
        })
    }

    fn update(&self, room: ChatRoom) -> RepositoryFuture<ChatRoom> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.lock();
            match state.rooms.get_mut(&room.id) {
                Some(existing) => {
                    *existing = room.clone();
                    Ok(room)
                }
                None => Err(RepositoryError::NotFound),
            }
        })
    }

    fn find_by_id(&self, id: RoomId) -> RepositoryFuture<Option<ChatRoom>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.lock().rooms.get(&id).cloned()) })
    }

    fn find_by_listing_and_buyer(
        &self,
        listing_id: ListingId,
        buyer_id: UserId,
    ) -> RepositoryFuture<Option<ChatRoom>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .lock()
                .rooms
                .values()
                .find(|room| room.listing_id == listing_id && room.buyer_id == buyer_id)
                .cloned())
        })
    }

    fn list_open_for(&self, user_id: UserId) -> RepositoryFuture<Vec<ChatRoom>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .lock()
                .rooms
                .values()
                .filter(|room| !room.is_closed && room.is_participant(user_id))
                .cloned()
                .collect())
        })
    }
}

impl MessageRepository for MemoryStore {
    fn append(&self, message: NewMessage) -> RepositoryFuture<Message> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.lock();
            if let Some(error) = state.append_failure.clone() {
                return Err(error);
            }
            if !state.rooms.contains_key(&message.room_id) {
                return Err(RepositoryError::NotFound);
            }

            state.last_message_id += 1;
            let message = message.into_message(MessageId::new(state.last_message_id));
            state.messages.push(message.clone());
            Ok(message)
        })
    }

    fn page(
        &self,
        room_id: RoomId,
        before: Option<MessageId>,
        limit: u32,
    ) -> RepositoryFuture<Vec<Message>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .lock()
                .messages
                .iter()
                .rev()
                .filter(|message| message.room_id == room_id)
                .filter(|message| before.map_or(true, |cursor| message.id < cursor))
                .take(limit as usize)
                .cloned()
                .collect())
        })
    }

    fn latest(&self, room_id: RoomId) -> RepositoryFuture<Option<Message>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .lock()
                .messages
                .iter()
                .rev()
                .find(|message| message.room_id == room_id)
                .cloned())
        })
    }
}

impl ListingRepository for MemoryStore {
    fn find_by_id(&self, id: ListingId) -> RepositoryFuture<Option<Listing>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.lock().listings.get(&id).cloned()) })
    }
}

impl UserDirectory for MemoryStore {
    fn find_by_id(&self, id: UserId) -> RepositoryFuture<Option<UserProfile>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.lock().users.get(&id).cloned()) })
    }
}

impl PushTokenStore for MemoryStore {
    fn get(&self, user_id: UserId) -> RepositoryFuture<Option<PushToken>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.push_token(user_id)) })
    }

    fn set(&self, user_id: UserId, token: PushToken) -> RepositoryFuture<()> {
        let store = self.clone();
        Box::pin(async move {
            store.set_push_token(user_id, token);
            Ok(())
        })
    }

    fn clear(&self, token: PushToken) -> RepositoryFuture<u64> {
        let store = self.clone();
        Box::pin(async move {
            let mut state = store.lock();
            let before = state.push_tokens.len();
            state.push_tokens.retain(|_, stored| *stored != token);
            Ok((before - state.push_tokens.len()) as u64)
        })
    }
}

/// 记录所有推送请求的推送替身，可以设置固定的失败结果
#[derive(Clone, Default)]
pub struct RecordingPushProvider {
    sent: Arc<Mutex<Vec<PushMessage>>>,
    failure: Arc<Mutex<Option<PushError>>>,
}

impl RecordingPushProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的每次发送都返回该错误
    pub fn fail_with(&self, error: PushError) {
        *self.failure.lock().unwrap_or_else(|p| p.into_inner()) = Some(error);
    }

    pub fn sent(&self) -> Vec<PushMessage> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// 等到至少记录了 `count` 条推送或超时，返回当时记录的全部推送
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<PushMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let sent = self.sent();
            if sent.len() >= count || tokio::time::Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl PushProvider for RecordingPushProvider {
    async fn send(&self, message: PushMessage) -> Result<PushTicket, PushError> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).push(message);

        let failure = self.failure.lock().unwrap_or_else(|p| p.into_inner()).clone();
        match failure {
            Some(error) => Err(error),
            None => Ok(PushTicket::default()),
        }
    }
}
