//! 好友 DTO

use serde::{Deserialize, Serialize};

use crate::im::types::UserRef;

/// 好友
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friend {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
}

/// 好友申请状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendRequestState {
    Pending,
    Accepted,
    Declined,
}

/// 收到的好友申请
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequest {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender: UserRef,
    #[serde(default = "pending")]
    pub status: FriendRequestState,
}

fn pending() -> FriendRequestState {
    FriendRequestState::Pending
}

/// 发送好友申请的请求体
#[derive(Debug, Serialize)]
pub struct SendFriendRequestReq<'a> {
    #[serde(rename = "recipientId")]
    pub recipient_id: &'a str,
}
