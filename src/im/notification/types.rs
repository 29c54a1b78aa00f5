//! 通知 DTO

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 通知发送者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSender {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
}

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    #[serde(rename = "FRIEND_REQUEST")]
    FriendRequest,
    #[serde(rename = "NEW_MESSAGE")]
    NewMessage,
    /// 后端新增的类型，客户端暂不认识
    #[serde(other)]
    Unknown,
}

impl NotificationKind {
    /// 面板上的描述文案
    pub fn describe(&self) -> &'static str {
        match self {
            NotificationKind::FriendRequest => "sent you a friend request.",
            NotificationKind::NewMessage => "sent you a message.",
            NotificationKind::Unknown => "sent you a notification.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender: NotificationSender,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(rename = "isRead", default)]
    pub is_read: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// 单行摘要，例如 `alice sent you a friend request.`
    pub fn summary(&self) -> String {
        format!("{} {}", self.sender.username, self.kind.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_backend_record() {
        let n: Notification = serde_json::from_value(json!({
            "_id": "n1",
            "sender": { "_id": "u2", "username": "bob" },
            "type": "FRIEND_REQUEST",
            "isRead": false,
            "createdAt": "2024-05-01T10:00:00.000Z"
        }))
        .unwrap();
        assert_eq!(n.kind, NotificationKind::FriendRequest);
        assert!(!n.is_read);
        assert_eq!(n.summary(), "bob sent you a friend request.");
    }

    #[test]
    fn unknown_kind_does_not_break_parsing() {
        let n: Notification = serde_json::from_value(json!({
            "_id": "n2",
            "sender": { "_id": "u2", "username": "bob" },
            "type": "MATCH_FOUND",
            "createdAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(n.kind, NotificationKind::Unknown);
        assert!(!n.is_read);
    }
}
