//! 实时事件定义（客户端发出的事件 / 服务器推送的事件）

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::im::chat::message::ChatMessage;
use crate::im::notification::types::Notification;
use crate::im::realtime::codec::Packet;

/// 事件名
pub mod event_name {
    pub const JOIN_ROOM: &str = "joinRoom";
    pub const SEND_MESSAGE: &str = "sendMessage";
    pub const RECEIVE_MESSAGE: &str = "receiveMessage";
    pub const NEW_NOTIFICATION: &str = "newNotification";
    pub const USER_ONLINE: &str = "userOnline";
    pub const USER_OFFLINE: &str = "userOffline";
}

/// `sendMessage` 的 messageData，保持后端要求的线上格式（sender 为用户名）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub sender: String,
    pub text: String,
}

/// 客户端发出的事件
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    JoinRoom {
        chat_id: String,
    },
    SendMessage {
        chat_id: String,
        message_data: OutgoingMessage,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom { .. } => event_name::JOIN_ROOM,
            ClientEvent::SendMessage { .. } => event_name::SEND_MESSAGE,
        }
    }

    pub fn to_packet(&self) -> Result<Packet> {
        let args = match self {
            ClientEvent::JoinRoom { chat_id } => vec![Value::String(chat_id.clone())],
            ClientEvent::SendMessage {
                chat_id,
                message_data,
            } => vec![serde_json::json!({
                "chatId": chat_id,
                "messageData": serde_json::to_value(message_data)?,
            })],
        };
        Ok(Packet::event(self.name(), args))
    }
}

#[derive(Debug, Deserialize)]
struct UserStatusPayload {
    #[serde(rename = "userId")]
    user_id: String,
}

/// 服务器推送的事件（以及连接状态变化），通过事件总线分发
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// 命名空间连接成功（首次连接或重连）
    Connected { sid: String },
    /// 连接断开
    Disconnected { reason: String },
    ReceiveMessage(ChatMessage),
    NewNotification(Notification),
    UserOnline { user_id: String },
    UserOffline { user_id: String },
    /// 未识别的事件，原样透传
    Other { name: String, args: Vec<Value> },
}

impl ServerEvent {
    /// 从 Socket.IO 事件帧解析
    pub fn from_event(name: &str, args: Vec<Value>) -> Result<Self> {
        let first = || {
            args.first()
                .cloned()
                .ok_or_else(|| anyhow!("事件 {name} 缺少参数"))
        };
        let event = match name {
            event_name::RECEIVE_MESSAGE => ServerEvent::ReceiveMessage(
                serde_json::from_value(first()?).context("解析 receiveMessage 失败")?,
            ),
            event_name::NEW_NOTIFICATION => ServerEvent::NewNotification(
                serde_json::from_value(first()?).context("解析 newNotification 失败")?,
            ),
            event_name::USER_ONLINE => {
                let payload: UserStatusPayload =
                    serde_json::from_value(first()?).context("解析 userOnline 失败")?;
                ServerEvent::UserOnline {
                    user_id: payload.user_id,
                }
            }
            event_name::USER_OFFLINE => {
                let payload: UserStatusPayload =
                    serde_json::from_value(first()?).context("解析 userOffline 失败")?;
                ServerEvent::UserOffline {
                    user_id: payload.user_id,
                }
            }
            _ => ServerEvent::Other {
                name: name.to_string(),
                args,
            },
        };
        Ok(event)
    }
}
