//! 聊天消息模型
//!
//! 历史接口返回的 sender 是对象 `{ _id, username }`，实时推送的 sender 是用户名字符串。
//! 两种形状在反序列化边界统一成 [`Sender`]，视图层只看到一种结构。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::im::types::User;

/// 统一后的发送者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub username: String,
}

impl Sender {
    /// 是否为指定用户：两边都有 ID 时按 ID 比较，否则按用户名比较
    pub fn is_user(&self, user: &User) -> bool {
        match &self.id {
            Some(id) if !id.is_empty() => id == &user.id,
            _ => self.username == user.username,
        }
    }
}

impl From<&User> for Sender {
    fn from(user: &User) -> Self {
        Self {
            id: Some(user.id.clone()),
            username: user.username.clone(),
        }
    }
}

/// 线上出现的 sender 两种形状
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSender {
    Object {
        #[serde(rename = "_id", default)]
        id: Option<String>,
        username: String,
    },
    Name(String),
}

impl From<RawSender> for Sender {
    fn from(raw: RawSender) -> Self {
        match raw {
            RawSender::Object { id, username } => Sender {
                id: id.filter(|id| !id.is_empty()),
                username,
            },
            RawSender::Name(username) => Sender { id: None, username },
        }
    }
}

/// chat 字段可能是 ID 字符串，也可能是被 populate 的对象
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawChatTag {
    Id(String),
    Object {
        #[serde(rename = "_id")]
        id: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    #[serde(rename = "chatId", default)]
    chat_id: Option<String>,
    #[serde(default)]
    chat: Option<RawChatTag>,
    sender: RawSender,
    #[serde(default)]
    text: String,
    #[serde(rename = "createdAt", default)]
    created_at: Option<DateTime<Utc>>,
}

impl From<RawMessage> for ChatMessage {
    fn from(raw: RawMessage) -> Self {
        let chat_id = raw.chat_id.or(match raw.chat {
            Some(RawChatTag::Id(id)) | Some(RawChatTag::Object { id }) => Some(id),
            None => None,
        });
        ChatMessage {
            id: raw.id,
            local_id: None,
            chat_id,
            sender: raw.sender.into(),
            text: raw.text,
            created_at: raw.created_at,
        }
    }
}

/// 聊天消息（创建后不再修改）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawMessage")]
pub struct ChatMessage {
    /// 服务器消息 ID（乐观写入的本地消息为空）
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// 本地生成的 ID，只用于乐观写入的回滚
    #[serde(skip)]
    pub local_id: Option<String>,
    /// 消息所属聊天（推送消息可能不带）
    #[serde(rename = "chatId", skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub sender: Sender,
    pub text: String,
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// 构造本地乐观消息
    pub fn local(chat_id: &str, sender: &User, text: String, local_id: String) -> Self {
        Self {
            id: None,
            local_id: Some(local_id),
            chat_id: Some(chat_id.to_string()),
            sender: sender.into(),
            text,
            created_at: Some(Utc::now()),
        }
    }

    pub fn is_local(&self) -> bool {
        self.local_id.is_some()
    }
}
