//! 聊天 HTTP API

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::im::api::ApiClient;
use crate::im::chat::message::ChatMessage;
use crate::im::realtime::events::OutgoingMessage;
use crate::im::types::{ChatRefData, Participant};

#[derive(Debug, Deserialize)]
struct HistoryData {
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatDetails {
    #[serde(default)]
    participants: Vec<Participant>,
}

#[derive(Debug, Deserialize)]
struct ChatDetailsData {
    chat: ChatDetails,
}

#[derive(Clone, Debug)]
pub struct ChatApi {
    api: ApiClient,
}

impl ChatApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// 历史消息
    pub async fn history(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        let data: HistoryData = self
            .api
            .get_json(&format!("/api/chats/{chat_id}/messages"))
            .await?
            .into_data("获取聊天记录")
            .with_context(|| format!("获取聊天 {chat_id} 的历史消息失败"))?;
        debug!("[ChatAPI] 聊天 {} 历史消息 {} 条", chat_id, data.messages.len());
        Ok(data.messages)
    }

    /// 聊天参与者
    pub async fn participants(&self, chat_id: &str) -> Result<Vec<Participant>> {
        let data: ChatDetailsData = self
            .api
            .get_json(&format!("/api/chats/{chat_id}"))
            .await?
            .into_data("获取聊天详情")
            .with_context(|| format!("获取聊天 {chat_id} 详情失败"))?;
        Ok(data.chat.participants)
    }

    /// 通过 REST 发送消息（实时通道之外的补充路径）
    pub async fn post_message(&self, chat_id: &str, message: &OutgoingMessage) -> Result<()> {
        self.api
            .post_json::<Value, _>(&format!("/api/chats/{chat_id}/messages"), message)
            .await
            .with_context(|| format!("REST 发送消息到 {chat_id} 失败"))?;
        Ok(())
    }

    /// 获取或创建与好友的私聊，返回聊天 ID
    pub async fn chat_with(&self, friend_id: &str) -> Result<String> {
        let data: ChatRefData = self
            .api
            .get_json(&format!("/api/chats/with/{friend_id}"))
            .await?
            .into_data("获取私聊")
            .with_context(|| format!("打开与 {friend_id} 的私聊失败"))?;
        info!("[ChatAPI] 💬 与 {} 的私聊: {}", friend_id, data.chat.id);
        Ok(data.chat.id)
    }
}
