//! 通知模块

pub mod api;
pub mod center;
pub mod listener;
pub mod push;
pub mod types;

pub use api::NotificationApi;
pub use center::NotificationCenter;
pub use listener::{EmptyNotificationListener, NotificationListener, SilentSoundCue, SoundCue};
pub use push::{PushPlatform, PushSubscription, SystemNotifier};
pub use types::{Notification, NotificationKind};
