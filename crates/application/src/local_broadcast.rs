// 单进程房间广播组
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use domain::RoomId;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::broadcaster::{BroadcastError, BroadcastGroup, ChatEvent, RoomSubscription, SessionId};

type Members = HashMap<SessionId, mpsc::Sender<ChatEvent>>;

pub struct LocalBroadcastGroup {
    rooms: Mutex<HashMap<RoomId, Members>>,
    capacity: usize,
}

impl LocalBroadcastGroup {
    /// `capacity` 是每个会话的出站缓冲
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn member_count(&self, room_id: RoomId) -> usize {
        self.lock().get(&room_id).map(HashMap::len).unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RoomId, Members>> {
        // 锁内不会 panic，中毒时直接沿用数据
        self.rooms.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for LocalBroadcastGroup {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl BroadcastGroup for LocalBroadcastGroup {
    async fn join(&self, room_id: RoomId, session_id: SessionId) -> Result<RoomSubscription, BroadcastError> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.lock().entry(room_id).or_default().insert(session_id, sender);

        tracing::debug!(room_id = %room_id, session_id = %session_id, "会话加入房间广播组");
        Ok(RoomSubscription::new(room_id, session_id, receiver))
    }

    async fn leave(&self, room_id: RoomId, session_id: SessionId) -> Result<(), BroadcastError> {
        let mut rooms = self.lock();
        if let Some(members) = rooms.get_mut(&room_id) {
            members.remove(&session_id);
            if members.is_empty() {
                rooms.remove(&room_id);
            }
        }
        Ok(())
    }

    async fn publish(&self, room_id: RoomId, event: ChatEvent) -> Result<usize, BroadcastError> {
        // 持锁期间完成整轮投递，保证同一房间的事件顺序
        let mut rooms = self.lock();
        let Some(members) = rooms.get_mut(&room_id) else {
            return Ok(0);
        };

        let mut delivered = 0;
        members.retain(|session_id, sender| match sender.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    room_id = %room_id,
                    session_id = %session_id,
                    "会话出站缓冲已满，丢弃事件"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });

        if members.is_empty() {
            rooms.remove(&room_id);
        }

        Ok(delivered)
    }
}
