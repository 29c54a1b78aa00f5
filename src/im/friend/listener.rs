//! 好友监听器回调接口

use async_trait::async_trait;

use crate::im::friend::types::{Friend, FriendRequest};

/// 好友监听器回调接口
#[async_trait]
pub trait FriendListener: Send + Sync {
    /// 好友列表发生变更（加载、删除、回滚）
    async fn on_friend_list_changed(&self, friends: Vec<Friend>);

    /// 待处理好友申请发生变更（加载、同意、拒绝、回滚）
    async fn on_friend_request_list_changed(&self, requests: Vec<FriendRequest>);
}

/// 默认空实现（无操作）
pub struct EmptyFriendListener;

#[async_trait]
impl FriendListener for EmptyFriendListener {
    async fn on_friend_list_changed(&self, _friends: Vec<Friend>) {
        // 默认不做任何处理
    }

    async fn on_friend_request_list_changed(&self, _requests: Vec<FriendRequest>) {
        // 默认不做任何处理
    }
}
