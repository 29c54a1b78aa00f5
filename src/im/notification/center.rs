//! 通知中心
//!
//! 维护当前用户的通知列表和未读数：
//! - `load` 拉取全量，保持服务器顺序
//! - 实时推送的通知插到最前面，并播放提示音
//! - 打开通知面板且有未读时，延迟一段时间后全部标记已读；延迟内关闭面板则取消
//!
//! 标记已读是乐观更新：先在本地翻转，请求失败时只把这次翻转过的通知恢复为未读。

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::im::notification::api::NotificationApi;
use crate::im::notification::listener::{
    EmptyNotificationListener, NotificationListener, SilentSoundCue, SoundCue,
};
use crate::im::notification::types::Notification;
use crate::im::realtime::bus::EventBus;
use crate::im::realtime::events::ServerEvent;

/// 新通知提示音
pub const NOTIFICATION_SOUND: &str = "/notification.mp3";

pub struct NotificationCenter {
    api: NotificationApi,
    items: RwLock<Vec<Notification>>,
    listener: Arc<dyn NotificationListener>,
    sound: Arc<dyn SoundCue>,
    mark_read_delay: Duration,
    scheduled: Mutex<Option<JoinHandle<()>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationCenter {
    pub fn new(api: NotificationApi, mark_read_delay: Duration) -> Self {
        Self::with_listener(
            api,
            mark_read_delay,
            Arc::new(EmptyNotificationListener),
            Arc::new(SilentSoundCue),
        )
    }

    pub fn with_listener(
        api: NotificationApi,
        mark_read_delay: Duration,
        listener: Arc<dyn NotificationListener>,
        sound: Arc<dyn SoundCue>,
    ) -> Self {
        Self {
            api,
            items: RwLock::new(Vec::new()),
            listener,
            sound,
            mark_read_delay,
            scheduled: Mutex::new(None),
            pump: Mutex::new(None),
        }
    }

    pub async fn load(&self) -> Result<()> {
        let list = self.api.list().await?;
        info!("[Notification] 📥 加载 {} 条通知", list.len());
        *self.items.write().unwrap_or_else(PoisonError::into_inner) = list;
        self.notify().await;
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<Notification> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn unread_count(&self) -> usize {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|n| !n.is_read)
            .count()
    }

    /// 处理实时推送的新通知，重复 ID 的通知会被忽略
    pub async fn handle_push(&self, notification: Notification) {
        {
            let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
            if items.iter().any(|n| n.id == notification.id) {
                debug!("[Notification] 重复通知 {}，忽略", notification.id);
                return;
            }
            info!("[Notification] 🔔 新通知: {}", notification.summary());
            items.insert(0, notification);
        }
        if let Err(e) = self.sound.play(NOTIFICATION_SOUND) {
            debug!("[Notification] 提示音播放失败: {:#}", e);
        }
        self.notify().await;
    }

    /// 全部标记为已读
    pub async fn mark_all_read(&self) -> Result<()> {
        let flipped: HashSet<String> = {
            let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
            items
                .iter_mut()
                .filter(|n| !n.is_read)
                .map(|n| {
                    n.is_read = true;
                    n.id.clone()
                })
                .collect()
        };
        if flipped.is_empty() {
            return Ok(());
        }
        self.notify().await;

        if let Err(e) = self.api.mark_all_read().await {
            error!("[Notification] ❌ 标记已读失败，回滚 {} 条: {:#}", flipped.len(), e);
            {
                let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
                for n in items.iter_mut().filter(|n| flipped.contains(&n.id)) {
                    n.is_read = false;
                }
            }
            self.notify().await;
            return Err(e);
        }
        Ok(())
    }

    /// 通知面板开关
    pub fn set_panel_open(self: &Arc<Self>, open: bool) {
        let mut scheduled = self.scheduled.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = scheduled.take() {
            pending.abort();
        }
        if !open || self.unread_count() == 0 {
            return;
        }

        debug!("[Notification] ⏱️ {:?} 后标记全部已读", self.mark_read_delay);
        let center = Arc::clone(self);
        *scheduled = Some(tokio::spawn(async move {
            tokio::time::sleep(center.mark_read_delay).await;
            // 请求一旦发出就不再受面板开关影响，失败时仍会回滚
            let request = tokio::spawn(async move { center.mark_all_read().await });
            match request.await {
                Ok(Err(e)) => warn!("[Notification] 延迟标记已读失败: {:#}", e),
                Err(e) => warn!("[Notification] 标记已读任务异常: {}", e),
                Ok(Ok(())) => {}
            }
        }));
    }

    /// 订阅事件总线上的 newNotification
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        let mut events = bus.subscribe();
        let center = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ServerEvent::NewNotification(n)) => center.handle_push(n).await,
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => warn!("[Notification] 事件积压，丢弃 {} 条", n),
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
        for slot in [&self.pump, &self.scheduled] {
            if let Some(handle) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                handle.abort();
            }
        }
    }

    /// 登出时清空
    pub fn clear(&self) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    async fn notify(&self) {
        let (items, unread) = {
            let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
            let unread = items.iter().filter(|n| !n.is_read).count();
            (items.clone(), unread)
        };
        self.listener.on_notifications_changed(items, unread).await;
    }
}

impl Drop for NotificationCenter {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::api::ApiClient;
    use crate::im::notification::types::{NotificationKind, NotificationSender};
    use crate::im::test_support::MockBackend;
    use axum::http::StatusCode;
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn notification(id: &str, is_read: bool) -> Notification {
        Notification {
            id: id.to_string(),
            sender: NotificationSender {
                id: "u2".into(),
                username: "bob".into(),
            },
            kind: NotificationKind::NewMessage,
            is_read,
            created_at: Utc::now(),
        }
    }

    fn listing() -> serde_json::Value {
        json!({ "success": true, "data": [
            { "_id": "n2", "sender": { "_id": "u2", "username": "bob" }, "type": "NEW_MESSAGE",
              "isRead": false, "createdAt": "2024-05-02T00:00:00Z" },
            { "_id": "n1", "sender": { "_id": "u3", "username": "eve" }, "type": "FRIEND_REQUEST",
              "isRead": true, "createdAt": "2024-05-01T00:00:00Z" }
        ]})
    }

    async fn center_with(mark_read_status: StatusCode, hits: Arc<AtomicUsize>) -> (MockBackend, Arc<NotificationCenter>) {
        let app = Router::new()
            .route("/api/notifications", get(|| async { Json(listing()) }))
            .route(
                "/api/notifications/read",
                put(move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        (mark_read_status, Json(json!({ "message": "Server exploded" })))
                    }
                }),
            );
        let backend = MockBackend::start(app).await;
        let api = NotificationApi::new(ApiClient::new(&backend.base_url).unwrap());
        let center = Arc::new(NotificationCenter::new(api, Duration::from_millis(100)));
        (backend, center)
    }

    #[tokio::test]
    async fn push_prepends_and_counts_unread() {
        let (_backend, center) = center_with(StatusCode::OK, Arc::default()).await;
        center.load().await.unwrap();
        assert_eq!(center.unread_count(), 1);

        center.handle_push(notification("n3", false)).await;
        center.handle_push(notification("n3", false)).await;
        let ids: Vec<String> = center.snapshot().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["n3", "n2", "n1"]);
        assert_eq!(center.unread_count(), 2);
    }

    #[tokio::test]
    async fn failed_mark_read_restores_only_flipped_items() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (_backend, center) = center_with(StatusCode::INTERNAL_SERVER_ERROR, hits.clone()).await;
        center.load().await.unwrap();

        let err = center.mark_all_read().await.unwrap_err();
        assert!(format!("{err:#}").contains("Server exploded"));
        let snapshot = center.snapshot();
        assert!(!snapshot[0].is_read);
        assert!(snapshot[1].is_read, "already-read item must stay read");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // 没有未读时不发请求
        let (_backend, center) = center_with(StatusCode::OK, hits.clone()).await;
        center.mark_all_read().await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mark_all_read_flips_every_item_and_keeps_order() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (_backend, center) = center_with(StatusCode::OK, hits.clone()).await;
        center.load().await.unwrap();
        center.handle_push(notification("n3", false)).await;

        let before: Vec<String> = center.snapshot().into_iter().map(|n| n.id).collect();
        assert_eq!(before, vec!["n3", "n2", "n1"]);
        assert_eq!(center.unread_count(), 2);

        center.mark_all_read().await.unwrap();
        let snapshot = center.snapshot();
        let after: Vec<String> = snapshot.iter().map(|n| n.id.clone()).collect();
        assert_eq!(after, before);
        assert!(snapshot.iter().all(|n| n.is_read));
        assert_eq!(center.unread_count(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panel_open_marks_read_after_delay() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (_backend, center) = center_with(StatusCode::OK, hits.clone()).await;
        center.load().await.unwrap();

        center.set_panel_open(true);
        assert_eq!(center.unread_count(), 1);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(center.unread_count(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closing_panel_early_cancels_mark_read() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (_backend, center) = center_with(StatusCode::OK, hits.clone()).await;
        center.load().await.unwrap();

        center.set_panel_open(true);
        center.set_panel_open(false);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(center.unread_count(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bus_notifications_reach_the_center() {
        let (_backend, center) = center_with(StatusCode::OK, Arc::default()).await;
        let bus = EventBus::new();
        center.attach(&bus);
        bus.publish(ServerEvent::NewNotification(notification("n9", false)));

        tokio::time::timeout(Duration::from_secs(2), async {
            while center.unread_count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(center.snapshot()[0].id, "n9");
    }
}
