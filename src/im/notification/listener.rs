//! 通知监听器回调接口

use async_trait::async_trait;

use crate::im::notification::types::Notification;

#[async_trait]
pub trait NotificationListener: Send + Sync {
    /// 通知列表发生变化（加载、推送、标记已读、回滚）
    async fn on_notifications_changed(&self, notifications: Vec<Notification>, unread_count: usize);
}

/// 默认空实现
pub struct EmptyNotificationListener;

#[async_trait]
impl NotificationListener for EmptyNotificationListener {
    async fn on_notifications_changed(&self, _notifications: Vec<Notification>, _unread: usize) {}
}

/// 新通知到达时的提示音，播放失败不影响通知本身
pub trait SoundCue: Send + Sync {
    fn play(&self, asset: &str) -> anyhow::Result<()>;
}

pub struct SilentSoundCue;

impl SoundCue for SilentSoundCue {
    fn play(&self, _asset: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
