//! 通知 HTTP API

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info};

use crate::im::api::ApiClient;
use crate::im::notification::push::PushSubscription;
use crate::im::notification::types::Notification;

#[derive(Clone, Debug)]
pub struct NotificationApi {
    api: ApiClient,
}

impl NotificationApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// 通知列表，保持服务器顺序（最新在前）
    pub async fn list(&self) -> Result<Vec<Notification>> {
        let list: Vec<Notification> = self
            .api
            .get_json("/api/notifications")
            .await?
            .into_data("获取通知列表")
            .context("获取通知列表失败")?;
        debug!("[NotificationAPI] 收到 {} 条通知", list.len());
        Ok(list)
    }

    /// 全部标记为已读
    pub async fn mark_all_read(&self) -> Result<()> {
        self.api
            .put_json::<Value, Value>("/api/notifications/read", None)
            .await
            .context("标记通知已读失败")?;
        info!("[NotificationAPI] ✅ 通知已全部标记为已读");
        Ok(())
    }

    /// 上报推送订阅
    pub async fn save_subscription(&self, subscription: &PushSubscription) -> Result<()> {
        self.api
            .post_json::<Value, _>("/api/notifications/subscribe", subscription)
            .await
            .context("保存推送订阅失败")?;
        info!("[NotificationAPI] ✅ 推送订阅已保存");
        Ok(())
    }
}
