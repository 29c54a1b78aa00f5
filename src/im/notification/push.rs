//! 系统推送：订阅上报和后台通知展示
//!
//! 平台相关的部分（权限申请、推送服务订阅、系统通知弹窗）由调用方通过
//! [`PushPlatform`] 和 [`SystemNotifier`] 注入。

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::im::notification::api::NotificationApi;
use crate::im::serialization::decode_url_safe_base64;

pub const PUSH_ICON: &str = "/icon-192x192.png";
pub const PUSH_BADGE: &str = "/badge-72x72.png";
/// 点击通知后打开的页面
pub const PUSH_CLICK_URL: &str = "/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

/// 推送服务返回的订阅信息，原样上报给后端
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    #[serde(rename = "expirationTime")]
    pub expiration_time: Option<i64>,
    pub keys: PushKeys,
}

/// 把 VAPID 公钥（URL-safe base64，可带可不带填充）解码成 application server key
pub fn application_server_key(vapid_public_key: &str) -> Result<Vec<u8>> {
    let key = vapid_public_key.trim();
    if key.is_empty() {
        bail!("VAPID public key not found.");
    }
    let bytes = decode_url_safe_base64(key).context("VAPID 公钥不是合法的 base64")?;
    if bytes.is_empty() {
        bail!("VAPID public key not found.");
    }
    Ok(bytes)
}

/// 平台推送能力
#[async_trait]
pub trait PushPlatform: Send + Sync {
    /// 已存在的订阅
    async fn existing_subscription(&self) -> Result<Option<PushSubscription>>;
    /// 申请通知权限，返回是否被授予
    async fn request_permission(&self) -> Result<bool>;
    async fn subscribe(&self, application_server_key: &[u8]) -> Result<PushSubscription>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    Enabled,
    Disabled,
}

/// 是否已经开启推送
pub async fn push_status(platform: &dyn PushPlatform) -> PushStatus {
    match platform.existing_subscription().await {
        Ok(Some(_)) => PushStatus::Enabled,
        Ok(None) => PushStatus::Disabled,
        Err(e) => {
            warn!("[Push] 查询推送订阅失败: {:#}", e);
            PushStatus::Disabled
        }
    }
}

/// 开启推送：申请权限 → 订阅 → 上报后端
pub async fn enable_push(
    api: &NotificationApi,
    platform: &dyn PushPlatform,
    vapid_public_key: Option<&str>,
) -> Result<PushStatus> {
    if !platform.request_permission().await? {
        bail!("You have denied notification permissions.");
    }
    let key = application_server_key(vapid_public_key.unwrap_or_default())?;
    let subscription = platform.subscribe(&key).await?;
    info!("[Push] 📮 已订阅推送: {}", subscription.endpoint);

    if let Err(e) = api.save_subscription(&subscription).await {
        error!("[Push] Failed to save subscription: {:#}", e);
        return Err(e);
    }
    Ok(PushStatus::Enabled)
}

/// 推送消息体
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    pub title: String,
    #[serde(default)]
    pub body: String,
}

/// 交给系统展示的通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemNotification {
    pub title: String,
    pub body: String,
    pub icon: &'static str,
    pub badge: &'static str,
}

pub trait SystemNotifier: Send + Sync {
    fn show(&self, notification: SystemNotification) -> Result<()>;
    fn open_window(&self, url: &str) -> Result<()>;
}

/// 处理一条后台推送
pub fn handle_push(data: &[u8], notifier: &dyn SystemNotifier) -> Result<()> {
    let payload: PushPayload =
        serde_json::from_slice(data).map_err(|e| anyhow!("推送数据解析失败: {e}"))?;
    notifier.show(SystemNotification {
        title: payload.title,
        body: payload.body,
        icon: PUSH_ICON,
        badge: PUSH_BADGE,
    })
}

/// 用户点击了系统通知
pub fn handle_notification_click(notifier: &dyn SystemNotifier) -> Result<()> {
    notifier.open_window(PUSH_CLICK_URL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::api::ApiClient;
    use crate::im::test_support::MockBackend;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingNotifier {
        shown: Mutex<Vec<SystemNotification>>,
        opened: Mutex<Vec<String>>,
    }

    impl SystemNotifier for RecordingNotifier {
        fn show(&self, notification: SystemNotification) -> Result<()> {
            self.shown.lock().unwrap().push(notification);
            Ok(())
        }

        fn open_window(&self, url: &str) -> Result<()> {
            self.opened.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    #[test]
    fn push_is_shown_with_app_icons() {
        let notifier = RecordingNotifier::default();
        handle_push(br#"{"title":"New message","body":"bob: hi"}"#, &notifier).unwrap();
        handle_notification_click(&notifier).unwrap();

        let shown = notifier.shown.lock().unwrap();
        assert_eq!(
            shown[0],
            SystemNotification {
                title: "New message".into(),
                body: "bob: hi".into(),
                icon: "/icon-192x192.png",
                badge: "/badge-72x72.png",
            }
        );
        assert_eq!(*notifier.opened.lock().unwrap(), vec!["/".to_string()]);
        assert!(handle_push(b"not json", &notifier).is_err());
    }

    #[test]
    fn vapid_key_must_be_present() {
        assert!(application_server_key("").is_err());
        assert_eq!(application_server_key("AQID").unwrap(), vec![1, 2, 3]);
    }

    struct FakePlatform {
        granted: bool,
    }

    #[async_trait]
    impl PushPlatform for FakePlatform {
        async fn existing_subscription(&self) -> Result<Option<PushSubscription>> {
            Ok(None)
        }

        async fn request_permission(&self) -> Result<bool> {
            Ok(self.granted)
        }

        async fn subscribe(&self, key: &[u8]) -> Result<PushSubscription> {
            assert_eq!(key, &[1, 2, 3]);
            Ok(PushSubscription {
                endpoint: "https://push.example/abc".into(),
                expiration_time: None,
                keys: PushKeys {
                    p256dh: "p".into(),
                    auth: "a".into(),
                },
            })
        }
    }

    #[tokio::test]
    async fn enable_push_posts_subscription() {
        let saved = Arc::new(Mutex::new(Vec::<Value>::new()));
        let sink = saved.clone();
        let app = Router::new().route(
            "/api/notifications/subscribe",
            post(move |Json(body): Json<Value>| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(body);
                    Json(json!({ "success": true }))
                }
            }),
        );
        let backend = MockBackend::start(app).await;
        let api = NotificationApi::new(ApiClient::new(&backend.base_url).unwrap());

        let status = enable_push(&api, &FakePlatform { granted: true }, Some("AQID"))
            .await
            .unwrap();
        assert_eq!(status, PushStatus::Enabled);
        assert_eq!(
            saved.lock().unwrap()[0],
            json!({
                "endpoint": "https://push.example/abc",
                "expirationTime": null,
                "keys": { "p256dh": "p", "auth": "a" }
            })
        );

        let err = enable_push(&api, &FakePlatform { granted: false }, Some("AQID"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "You have denied notification permissions.");
        assert_eq!(
            push_status(&FakePlatform { granted: true }).await,
            PushStatus::Disabled
        );
    }
}
