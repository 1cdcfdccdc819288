use crate::errors::DomainError;
use crate::listing::Listing;
use crate::value_objects::{ListingId, RoomId, Timestamp, UserId};

/// 买家与卖家围绕某个商品的会话
///
/// 同一个 (商品, 买家) 最多只有一个聊天室，卖家由商品发布者决定。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatRoom {
    pub id: RoomId,
    pub listing_id: ListingId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub is_closed: bool,
    pub created_at: Timestamp,
}

impl ChatRoom {
    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    /// 返回对话中的另一方；`user_id` 不是参与者时返回 None
    pub fn other_participant(&self, user_id: UserId) -> Option<UserId> {
        if user_id == self.buyer_id {
            Some(self.seller_id)
        } else if user_id == self.seller_id {
            Some(self.buyer_id)
        } else {
            None
        }
    }

    pub fn ensure_participant(&self, user_id: UserId) -> Result<(), DomainError> {
        if self.is_participant(user_id) {
            Ok(())
        } else {
            Err(DomainError::NotParticipant)
        }
    }

    pub fn close(&mut self) {
        self.is_closed = true;
    }

    pub fn reopen(&mut self) {
        self.is_closed = false;
    }
}

/// 尚未持久化的聊天室，id 由存储层分配
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatRoom {
    pub listing_id: ListingId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub created_at: Timestamp,
}

impl NewChatRoom {
    pub fn for_listing(
        listing: &Listing,
        buyer_id: UserId,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        if listing.owner_id == buyer_id {
            return Err(DomainError::SelfChat);
        }
        Ok(Self {
            listing_id: listing.id,
            buyer_id,
            seller_id: listing.owner_id,
            created_at,
        })
    }

    pub fn into_room(self, id: RoomId) -> ChatRoom {
        ChatRoom {
            id,
            listing_id: self.listing_id,
            buyer_id: self.buyer_id,
            seller_id: self.seller_id,
            is_closed: false,
            created_at: self.created_at,
        }
    }
}
