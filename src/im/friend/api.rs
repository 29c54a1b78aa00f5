//! 好友 HTTP API 客户端
//!
//! 负责所有好友相关的 HTTP 请求

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info};

use crate::im::api::ApiClient;
use crate::im::friend::types::{Friend, FriendRequest, SendFriendRequestReq};

/// 好友相关的 HTTP API 客户端
#[derive(Clone, Debug)]
pub struct FriendApi {
    api: ApiClient,
}

impl FriendApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// 好友列表
    pub async fn list_friends(&self) -> Result<Vec<Friend>> {
        info!("[FriendAPI] 📡 请求好友列表");
        let friends: Vec<Friend> = self
            .api
            .get_json("/api/friends")
            .await?
            .into_data("获取好友列表")
            .context("Failed to fetch friends")?;
        info!("[FriendAPI] ✅ 好友数: {}", friends.len());
        Ok(friends)
    }

    /// 删除好友
    pub async fn unfriend(&self, friend_id: &str) -> Result<()> {
        self.api
            .delete_json::<Value>(&format!("/api/friends/{friend_id}"))
            .await
            .with_context(|| format!("删除好友 {friend_id} 失败"))?;
        info!("[FriendAPI] 已删除好友 {}", friend_id);
        Ok(())
    }

    /// 发送好友申请
    pub async fn send_request(&self, recipient_id: &str) -> Result<()> {
        debug!("[FriendAPI] 📡 向 {} 发送好友申请", recipient_id);
        self.api
            .post_json::<Value, _>(
                "/api/friends/request",
                &SendFriendRequestReq { recipient_id },
            )
            .await?;
        info!("[FriendAPI] ✅ 好友申请已发送给 {}", recipient_id);
        Ok(())
    }

    /// 待处理的好友申请
    pub async fn pending_requests(&self) -> Result<Vec<FriendRequest>> {
        let requests: Vec<FriendRequest> = self
            .api
            .get_json("/api/friends/requests")
            .await?
            .into_data("获取好友申请")
            .context("Failed to fetch friend requests")?;
        info!("[FriendAPI] ✅ 待处理好友申请: {}", requests.len());
        Ok(requests)
    }

    pub async fn accept(&self, request_id: &str) -> Result<()> {
        self.api
            .put_json::<Value, Value>(&format!("/api/friends/requests/{request_id}/accept"), None)
            .await
            .context("Could not accept the request. Please try again.")?;
        Ok(())
    }

    pub async fn decline(&self, request_id: &str) -> Result<()> {
        self.api
            .delete_json::<Value>(&format!("/api/friends/requests/{request_id}/decline"))
            .await
            .context("Could not decline the request. Please try again.")?;
        Ok(())
    }
}
