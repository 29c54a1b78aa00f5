//! 聊天室监听器回调接口

use async_trait::async_trait;

use crate::im::chat::message::ChatMessage;
use crate::im::chat::room::{FriendRequestStatus, RoomPhase};
use crate::im::types::Participant;

#[async_trait]
pub trait ChatRoomListener: Send + Sync {
    /// 消息序列发生变化（UI 据此滚动到底部）
    async fn on_messages_changed(&self, chat_id: &str, messages: Vec<ChatMessage>);

    async fn on_partner_changed(&self, _chat_id: &str, _partner: Option<Participant>) {}

    async fn on_phase_changed(&self, _chat_id: &str, _phase: RoomPhase) {}

    async fn on_friend_request_status_changed(&self, _chat_id: &str, _status: FriendRequestStatus) {}
}

pub struct EmptyChatRoomListener;

#[async_trait]
impl ChatRoomListener for EmptyChatRoomListener {
    async fn on_messages_changed(&self, _chat_id: &str, _messages: Vec<ChatMessage>) {}
}
