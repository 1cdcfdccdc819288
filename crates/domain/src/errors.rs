//! 领域模型错误定义

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 参数校验失败（缺少字段、内容为空等）
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("chat room not found")]
    RoomNotFound,

    #[error("listing not found")]
    ListingNotFound,

    /// 聊天室已关闭，对外表现为不存在
    #[error("chat room not found or already closed")]
    RoomClosed,

    /// 买家就是商品发布者
    #[error("you cannot chat with yourself")]
    SelfChat,

    /// 当前用户既不是买家也不是卖家
    #[error("user is not a participant of this chat room")]
    NotParticipant,
}

impl DomainError {
    pub fn invalid_argument(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }
}

/// 存储层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    /// 唯一约束冲突
    #[error("record already exists")]
    Conflict,
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}
