use crate::value_objects::UserId;

/// 已认证用户的身份信息
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
}

impl UserProfile {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// 推送通知里使用的发送者名称，名字为空时退化为通用文案
    pub fn notification_name(&self) -> &str {
        let trimmed = self.name.trim();
        if trimmed.is_empty() {
            "New message"
        } else {
            trimmed
        }
    }
}
