//! 在线状态跟踪
//!
//! 启动时从 `/api/users/online` 拉一次全量，之后只靠 `userOnline` / `userOffline`
//! 推送增量维护。断线重连后不会重新拉全量，期间错过的事件不做补偿。

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::im::api::ApiClient;
use crate::im::realtime::bus::EventBus;
use crate::im::realtime::events::ServerEvent;

/// 在线状态监听器
#[async_trait]
pub trait PresenceListener: Send + Sync {
    /// 在线用户集合发生变化，参数为排序后的用户 ID 列表
    async fn on_online_users_changed(&self, online_user_ids: Vec<String>);
}

pub struct EmptyPresenceListener;

#[async_trait]
impl PresenceListener for EmptyPresenceListener {
    async fn on_online_users_changed(&self, _online_user_ids: Vec<String>) {}
}

#[derive(Debug, Deserialize)]
struct OnlineUsersData {
    #[serde(rename = "onlineUserIds", default)]
    online_user_ids: Vec<String>,
}

/// 进程级在线用户集合
pub struct OnlineStatusStore {
    api: ApiClient,
    online: RwLock<HashSet<String>>,
    listener: Arc<dyn PresenceListener>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl OnlineStatusStore {
    pub fn new(api: ApiClient) -> Self {
        Self::with_listener(api, Arc::new(EmptyPresenceListener))
    }

    pub fn with_listener(api: ApiClient, listener: Arc<dyn PresenceListener>) -> Self {
        Self {
            api,
            online: RwLock::new(HashSet::new()),
            listener,
            pump: Mutex::new(None),
        }
    }

    /// 拉取当前在线用户，整体替换本地集合
    pub async fn load(&self) -> Result<()> {
        let data: OnlineUsersData = self
            .api
            .get_json("/api/users/online")
            .await?
            .into_data("获取在线用户")
            .context("加载在线用户失败")?;
        info!("[Presence] 📥 当前在线用户 {} 人", data.online_user_ids.len());

        {
            let mut online = self.online.write().unwrap_or_else(PoisonError::into_inner);
            *online = data.online_user_ids.into_iter().collect();
        }
        self.notify().await;
        Ok(())
    }

    /// 应用一条推送事件，返回集合是否发生变化
    pub fn apply(&self, event: &ServerEvent) -> bool {
        let mut online = self.online.write().unwrap_or_else(PoisonError::into_inner);
        match event {
            ServerEvent::UserOnline { user_id } => {
                debug!("[Presence] 🟢 {} 上线", user_id);
                online.insert(user_id.clone())
            }
            ServerEvent::UserOffline { user_id } => {
                debug!("[Presence] ⚪ {} 下线", user_id);
                online.remove(user_id)
            }
            _ => false,
        }
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(user_id)
    }

    /// 排序后的在线用户列表
    pub fn snapshot(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .online
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// 订阅事件总线，重复调用会替换之前的订阅
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        let mut events = bus.subscribe();
        let store = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if store.apply(&event) {
                            store.notify().await;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("[Presence] 事件积压，丢弃 {} 条", n);
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

    pub fn detach(&self) {
        if let Some(handle) = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    /// 清空本地集合（登出时）
    pub fn clear(&self) {
        self.online
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    async fn notify(&self) {
        self.listener.on_online_users_changed(self.snapshot()).await;
    }
}

impl Drop for OnlineStatusStore {
    fn drop(&mut self) {
        self.detach();
    }
}
