//! 本地事件总线
//!
//! 整个会话只有一条实时连接，连接读到的事件发布到总线上，
//! 各个 store（在线状态、通知、聊天室）各自订阅。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::debug;

use crate::im::realtime::events::ServerEvent;

/// 总线缓冲区大小，订阅方处理过慢时最旧的事件会被丢弃
const BUS_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
    rooms: RoomRegistry,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            sender,
            rooms: RoomRegistry::default(),
        }
    }

    /// 发布事件，没有订阅方时直接丢弃
    pub fn publish(&self, event: ServerEvent) {
        if self.sender.send(event).is_err() {
            debug!("[Bus] 没有订阅方，事件被丢弃");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// 已加入的聊天室（引用计数，同一个房间可以被多个视图打开）
#[derive(Clone, Default)]
pub struct RoomRegistry {
    inner: Arc<Mutex<HashMap<String, usize>>>,
}

impl RoomRegistry {
    /// 登记房间，返回的租约被 drop 时自动注销
    pub fn register(&self, chat_id: &str) -> RoomLease {
        let mut rooms = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *rooms.entry(chat_id.to_string()).or_insert(0) += 1;
        RoomLease {
            registry: self.clone(),
            chat_id: chat_id.to_string(),
        }
    }

    fn release(&self, chat_id: &str) {
        let mut rooms = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = rooms.get_mut(chat_id) {
            *count -= 1;
            if *count == 0 {
                rooms.remove(chat_id);
            }
        }
    }

    pub fn contains(&self, chat_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(chat_id)
    }

    /// 当前不同房间的数量
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 所有房间 ID（重连后重新 joinRoom 用）
    pub fn chat_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

/// 房间登记租约
pub struct RoomLease {
    registry: RoomRegistry,
    chat_id: String,
}

impl RoomLease {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }
}

impl Drop for RoomLease {
    fn drop(&mut self) {
        self.registry.release(&self.chat_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leases_are_reference_counted() {
        let registry = RoomRegistry::default();
        let a = registry.register("c1");
        let b = registry.register("c1");
        let c = registry.register("c2");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.chat_ids(), vec!["c1".to_string(), "c2".to_string()]);

        drop(a);
        assert!(registry.contains("c1"));
        drop(b);
        assert!(!registry.contains("c1"));
        assert_eq!(c.chat_id(), "c2");
        drop(c);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn every_subscriber_sees_published_events() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(ServerEvent::UserOnline {
            user_id: "u1".to_string(),
        });

        for rx in [&mut first, &mut second] {
            match rx.recv().await.unwrap() {
                ServerEvent::UserOnline { user_id } => assert_eq!(user_id, "u1"),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }
}
