use crate::value_objects::{ListingId, UserId};

/// 商品信息，由商品服务维护，这里只读取聊天需要的字段
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub title: String,
    pub owner_id: UserId,
}
