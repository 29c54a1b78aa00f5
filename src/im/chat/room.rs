//! 聊天室同步
//!
//! 每个打开的聊天视图对应一个 [`ChatRoom`]，生命周期 `Idle → Loading → Joined → Closed`：
//! - `open` 并行拉取历史消息和聊天详情，登记房间并发送 joinRoom
//! - 收到的消息按 chatId 路由；不带 chatId 的消息只在会话里恰好登记了一个房间时接收
//! - 发送时先乐观追加一条本地消息，实时通道发送失败才回滚（REST 补发失败不回滚）
//! - 自己发出的消息被服务器广播回来时，替换对应的本地消息而不是再追加一条

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::{bail, Result};
use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::im::chat::api::ChatApi;
use crate::im::chat::listener::{ChatRoomListener, EmptyChatRoomListener};
use crate::im::chat::message::ChatMessage;
use crate::im::error::{ApiError, ValidationErrors};
use crate::im::friend::api::FriendApi;
use crate::im::realtime::bus::{EventBus, RoomLease};
use crate::im::realtime::connection::RealtimeSink;
use crate::im::realtime::events::{ClientEvent, OutgoingMessage, ServerEvent};
use crate::im::serialization::generate_local_msg_id;
use crate::im::types::{Participant, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Idle,
    Loading,
    Joined,
    Closed,
}

/// 与聊天对象之间的好友申请状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendRequestStatus {
    Idle,
    Sent,
    Friends,
}

/// 聊天室依赖的会话级资源
#[derive(Clone)]
pub struct ChatContext {
    pub api: ChatApi,
    pub friends: FriendApi,
    pub sink: Arc<dyn RealtimeSink>,
    pub bus: EventBus,
    /// 实时发送之后是否再走一次 REST
    pub rest_fallback: bool,
}

struct RoomState {
    phase: RoomPhase,
    messages: Vec<ChatMessage>,
    partner: Option<Participant>,
    draft: String,
    request_status: FriendRequestStatus,
}

pub struct ChatRoom {
    chat_id: String,
    me: User,
    ctx: ChatContext,
    state: RwLock<RoomState>,
    listener: Arc<dyn ChatRoomListener>,
    lease: Mutex<Option<RoomLease>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ChatRoom {
    pub fn new(chat_id: impl Into<String>, me: User, ctx: ChatContext) -> Arc<Self> {
        Self::with_listener(chat_id, me, ctx, Arc::new(EmptyChatRoomListener))
    }

    pub fn with_listener(
        chat_id: impl Into<String>,
        me: User,
        ctx: ChatContext,
        listener: Arc<dyn ChatRoomListener>,
    ) -> Arc<Self> {
        Arc::new(Self {
            chat_id: chat_id.into(),
            me,
            ctx,
            state: RwLock::new(RoomState {
                phase: RoomPhase::Idle,
                messages: Vec::new(),
                partner: None,
                draft: String::new(),
                request_status: FriendRequestStatus::Idle,
            }),
            listener,
            lease: Mutex::new(None),
            pump: Mutex::new(None),
        })
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn phase(&self) -> RoomPhase {
        self.read().phase
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.read().messages.clone()
    }

    pub fn partner(&self) -> Option<Participant> {
        self.read().partner.clone()
    }

    pub fn draft(&self) -> String {
        self.read().draft.clone()
    }

    pub fn request_status(&self) -> FriendRequestStatus {
        self.read().request_status
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        self.write().draft = text.into();
    }

    /// 打开聊天室
    ///
    /// 先订阅事件总线再拉历史，拉取期间到达的推送会缓冲在订阅里，Joined 之后再处理。
    pub async fn open(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.write();
            match state.phase {
                RoomPhase::Idle => state.phase = RoomPhase::Loading,
                RoomPhase::Closed => bail!("聊天室 {} 已关闭", self.chat_id),
                _ => return Ok(()),
            }
        }
        info!("[Chat] 📂 打开聊天室 {}", self.chat_id);
        self.listener
            .on_phase_changed(&self.chat_id, RoomPhase::Loading)
            .await;

        let events = self.ctx.bus.subscribe();
        *self.lease.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(self.ctx.bus.rooms().register(&self.chat_id));

        let (history, participants) = tokio::join!(
            self.ctx.api.history(&self.chat_id),
            self.ctx.api.participants(&self.chat_id)
        );

        let partner = {
            let mut state = self.write();
            if state.phase == RoomPhase::Closed {
                debug!("[Chat] 聊天室 {} 已关闭，丢弃加载结果", self.chat_id);
                return Ok(());
            }
            match history {
                Ok(history) => state.messages = history,
                Err(e) => warn!("[Chat] Failed to fetch chat history: {:#}", e),
            }
            match participants {
                Ok(participants) => {
                    state.partner = participants.into_iter().find(|p| p.id != self.me.id);
                    if let Some(partner) = &state.partner {
                        if self.me.is_friend_of(&partner.id) {
                            state.request_status = FriendRequestStatus::Friends;
                        }
                    }
                }
                Err(e) => warn!("[Chat] Failed to fetch chat details: {:#}", e),
            }
            state.partner.clone()
        };

        if let Err(e) = self
            .ctx
            .sink
            .emit(ClientEvent::JoinRoom {
                chat_id: self.chat_id.clone(),
            })
            .await
        {
            // 房间已登记，会话重连后会补发 joinRoom
            warn!("[Chat] joinRoom {} 发送失败: {:#}", self.chat_id, e);
        }

        {
            // 持锁切换状态并启动 pump，与 close 互斥
            let mut state = self.write();
            if state.phase == RoomPhase::Closed {
                debug!("[Chat] 聊天室 {} 在加入过程中被关闭", self.chat_id);
                return Ok(());
            }
            state.phase = RoomPhase::Joined;
            self.start_pump(events);
        }
        info!("[Chat] ✅ 已加入聊天室 {}", self.chat_id);

        self.listener
            .on_phase_changed(&self.chat_id, RoomPhase::Joined)
            .await;
        self.listener.on_partner_changed(&self.chat_id, partner).await;
        self.listener
            .on_friend_request_status_changed(&self.chat_id, self.request_status())
            .await;
        self.notify_messages().await;
        Ok(())
    }

    /// 发送草稿
    pub async fn send(&self) -> Result<()> {
        let (text, local_id) = {
            let mut state = self.write();
            if state.phase != RoomPhase::Joined {
                bail!("聊天室 {} 尚未就绪", self.chat_id);
            }
            let text = state.draft.trim().to_string();
            if text.is_empty() {
                let mut errors = ValidationErrors::new();
                errors.add("text", "Message cannot be empty.");
                return Err(ApiError::Validation(errors).into());
            }
            let local_id = generate_local_msg_id(&self.me.id);
            state.messages.push(ChatMessage::local(
                &self.chat_id,
                &self.me,
                text.clone(),
                local_id.clone(),
            ));
            state.draft.clear();
            (text, local_id)
        };
        self.notify_messages().await;

        let message_data = OutgoingMessage {
            sender: self.me.username.clone(),
            text: text.clone(),
        };
        debug!("[Chat] 📤 发送消息 {} 到 {}", local_id, self.chat_id);

        if let Err(e) = self
            .ctx
            .sink
            .emit(ClientEvent::SendMessage {
                chat_id: self.chat_id.clone(),
                message_data: message_data.clone(),
            })
            .await
        {
            warn!("[Chat] ❌ 发送失败，撤回本地消息 {}: {:#}", local_id, e);
            {
                let mut state = self.write();
                state
                    .messages
                    .retain(|m| m.local_id.as_deref() != Some(local_id.as_str()));
                if state.draft.is_empty() {
                    state.draft = text;
                }
            }
            self.notify_messages().await;
            return Err(e);
        }

        if self.ctx.rest_fallback {
            if let Err(e) = self.ctx.api.post_message(&self.chat_id, &message_data).await {
                debug!("[Chat] REST fallback failed or not available: {:#}", e);
            }
        }
        Ok(())
    }

    /// 设置草稿并发送
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.set_draft(text);
        self.send().await
    }

    /// 向聊天对象发送好友申请
    pub async fn send_friend_request(&self) -> Result<()> {
        let (partner, status) = {
            let state = self.read();
            (state.partner.clone(), state.request_status)
        };
        let Some(partner) = partner else {
            bail!("聊天对象尚未加载");
        };
        if status != FriendRequestStatus::Idle {
            debug!("[Chat] 好友申请状态为 {:?}，不再发送", status);
            return Ok(());
        }

        self.ctx.friends.send_request(&partner.id).await?;
        self.write().request_status = FriendRequestStatus::Sent;
        self.listener
            .on_friend_request_status_changed(&self.chat_id, FriendRequestStatus::Sent)
            .await;
        Ok(())
    }

    /// 关闭聊天室：注销房间、停止接收，之后到达的结果一律丢弃
    pub async fn close(&self) {
        {
            let mut state = self.write();
            if state.phase == RoomPhase::Closed {
                return;
            }
            state.phase = RoomPhase::Closed;
        }
        self.stop_pump();
        self.lease
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!("[Chat] 👋 关闭聊天室 {}", self.chat_id);
        self.listener
            .on_phase_changed(&self.chat_id, RoomPhase::Closed)
            .await;
    }

    /// 处理一条推送消息，返回消息序列是否变化
    pub(crate) fn accept_incoming(&self, mut message: ChatMessage) -> bool {
        match message.chat_id.as_deref() {
            Some(chat_id) if chat_id != self.chat_id => return false,
            Some(_) => {}
            None => {
                let rooms = self.ctx.bus.rooms();
                if rooms.len() != 1 || !rooms.contains(&self.chat_id) {
                    debug!("[Chat] 无法确定归属的消息，忽略");
                    return false;
                }
                message.chat_id = Some(self.chat_id.clone());
            }
        }

        let mut state = self.write();
        if state.phase != RoomPhase::Joined {
            return false;
        }
        if let Some(id) = &message.id {
            if state.messages.iter().any(|m| m.id.as_ref() == Some(id)) {
                debug!("[Chat] 重复消息 {}，忽略", id);
                return false;
            }
        }

        if message.sender.is_user(&self.me) {
            let pending = state
                .messages
                .iter()
                .position(|m| m.is_local() && m.text == message.text);
            if let Some(index) = pending {
                let local = &mut state.messages[index];
                message.created_at = message.created_at.or(local.created_at);
                message.sender = local.sender.clone();
                *local = message;
                return true;
            }
        }

        if message.created_at.is_none() {
            message.created_at = Some(Utc::now());
        }
        state.messages.push(message);
        true
    }

    fn start_pump(self: &Arc<Self>, mut events: Receiver<ServerEvent>) {
        let room = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                let event = events.recv().await;
                let Some(room) = room.upgrade() else { break };
                match event {
                    Ok(ServerEvent::ReceiveMessage(message)) => {
                        if room.accept_incoming(message) {
                            room.notify_messages().await;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!("[Chat] 聊天室 {} 事件积压，丢弃 {} 条", room.chat_id, n)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        if let Some(old) = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle)
        {
            old.abort();
        }
    }

    fn stop_pump(&self) {
        if let Some(handle) = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    async fn notify_messages(&self) {
        self.listener
            .on_messages_changed(&self.chat_id, self.messages())
            .await;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RoomState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RoomState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ChatRoom {
    fn drop(&mut self) {
        self.stop_pump();
    }
}
