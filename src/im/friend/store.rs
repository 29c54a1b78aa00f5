//! 好友列表和好友申请的本地状态
//!
//! 同意 / 拒绝申请和删除好友都先从本地列表移除，再发请求；请求失败时把被移除的那一项
//! 放回原来的位置。

use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{anyhow, Result};
use tracing::{error, info};

use crate::im::friend::api::FriendApi;
use crate::im::friend::listener::{EmptyFriendListener, FriendListener};
use crate::im::friend::types::{Friend, FriendRequest};

/// 按 ID 取出一项，返回原位置
fn take_by_id<T>(items: &mut Vec<T>, id: &str, key: impl Fn(&T) -> &str) -> Option<(usize, T)> {
    let index = items.iter().position(|item| key(item) == id)?;
    Some((index, items.remove(index)))
}

/// 放回原位置（列表期间变短时追加到末尾）
fn restore<T>(items: &mut Vec<T>, index: usize, item: T) {
    let index = index.min(items.len());
    items.insert(index, item);
}

#[derive(Debug, Clone, Copy)]
enum RequestAction {
    Accept,
    Decline,
}

/// 待处理的好友申请
pub struct FriendRequestStore {
    api: FriendApi,
    requests: RwLock<Vec<FriendRequest>>,
    listener: Arc<dyn FriendListener>,
}

impl FriendRequestStore {
    pub fn new(api: FriendApi) -> Self {
        Self::with_listener(api, Arc::new(EmptyFriendListener))
    }

    pub fn with_listener(api: FriendApi, listener: Arc<dyn FriendListener>) -> Self {
        Self {
            api,
            requests: RwLock::new(Vec::new()),
            listener,
        }
    }

    pub async fn load(&self) -> Result<()> {
        let requests = self.api.pending_requests().await?;
        *self.requests.write().unwrap_or_else(PoisonError::into_inner) = requests;
        self.notify().await;
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<FriendRequest> {
        self.requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 同意申请，成功时返回该申请
    pub async fn accept(&self, request_id: &str) -> Result<FriendRequest> {
        self.resolve(request_id, RequestAction::Accept).await
    }

    pub async fn decline(&self, request_id: &str) -> Result<FriendRequest> {
        self.resolve(request_id, RequestAction::Decline).await
    }

    async fn resolve(&self, request_id: &str, action: RequestAction) -> Result<FriendRequest> {
        let (index, request) = {
            let mut requests = self.requests.write().unwrap_or_else(PoisonError::into_inner);
            take_by_id(&mut requests, request_id, |r| r.id.as_str())
                .ok_or_else(|| anyhow!("好友申请 {request_id} 不存在"))?
        };
        self.notify().await;

        let result = match action {
            RequestAction::Accept => self.api.accept(request_id).await,
            RequestAction::Decline => self.api.decline(request_id).await,
        };
        match result {
            Ok(()) => {
                info!(
                    "[Friend] ✅ 已处理 {} 的好友申请 ({:?})",
                    request.sender.username, action
                );
                Ok(request)
            }
            Err(e) => {
                error!("[Friend] ❌ 处理好友申请 {} 失败，回滚: {:#}", request_id, e);
                restore(
                    &mut self.requests.write().unwrap_or_else(PoisonError::into_inner),
                    index,
                    request,
                );
                self.notify().await;
                Err(e)
            }
        }
    }

    pub fn clear(&self) {
        self.requests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    async fn notify(&self) {
        self.listener
            .on_friend_request_list_changed(self.snapshot())
            .await;
    }
}

/// 好友列表
pub struct FriendList {
    api: FriendApi,
    friends: RwLock<Vec<Friend>>,
    listener: Arc<dyn FriendListener>,
}

impl FriendList {
    pub fn new(api: FriendApi) -> Self {
        Self::with_listener(api, Arc::new(EmptyFriendListener))
    }

    pub fn with_listener(api: FriendApi, listener: Arc<dyn FriendListener>) -> Self {
        Self {
            api,
            friends: RwLock::new(Vec::new()),
            listener,
        }
    }

    pub async fn load(&self) -> Result<()> {
        let friends = self.api.list_friends().await?;
        *self.friends.write().unwrap_or_else(PoisonError::into_inner) = friends;
        self.notify().await;
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<Friend> {
        self.friends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, friend_id: &str) -> bool {
        self.friends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|f| f.id == friend_id)
    }

    /// 删除好友
    pub async fn unfriend(&self, friend_id: &str) -> Result<()> {
        let (index, friend) = {
            let mut friends = self.friends.write().unwrap_or_else(PoisonError::into_inner);
            take_by_id(&mut friends, friend_id, |f| f.id.as_str())
                .ok_or_else(|| anyhow!("好友 {friend_id} 不存在"))?
        };
        self.notify().await;

        if let Err(e) = self.api.unfriend(friend_id).await {
            error!("[Friend] ❌ 删除好友 {} 失败，回滚: {:#}", friend.username, e);
            restore(
                &mut self.friends.write().unwrap_or_else(PoisonError::into_inner),
                index,
                friend,
            );
            self.notify().await;
            return Err(e);
        }
        Ok(())
    }

    pub fn clear(&self) {
        self.friends
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    async fn notify(&self) {
        self.listener.on_friend_list_changed(self.snapshot()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::api::ApiClient;
    use crate::im::test_support::MockBackend;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{delete, get, put};
    use axum::{Json, Router};
    use serde_json::json;

    fn routes() -> Router {
        Router::new()
            .route(
                "/api/friends/requests",
                get(|| async {
                    Json(json!({ "success": true, "data": [
                        { "_id": "r1", "sender": { "_id": "u2", "username": "bob", "email": "b@x.io" }, "status": "pending" },
                        { "_id": "r2", "sender": { "_id": "u3", "username": "eve", "email": "e@x.io" }, "status": "pending" },
                        { "_id": "r3", "sender": { "_id": "u4", "username": "dan", "email": "d@x.io" }, "status": "pending" }
                    ]}))
                }),
            )
            .route(
                "/api/friends/requests/{id}/accept",
                put(|Path(id): Path<String>| async move {
                    if id == "r2" {
                        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "message": "db down" })))
                    } else {
                        (StatusCode::OK, Json(json!({ "success": true })))
                    }
                }),
            )
            .route(
                "/api/friends/requests/{id}/decline",
                delete(|| async { Json(json!({ "success": true })) }),
            )
            .route(
                "/api/friends",
                get(|| async {
                    Json(json!({ "success": true, "data": [
                        { "_id": "u2", "username": "bob", "email": "b@x.io" },
                        { "_id": "u5", "username": "kim", "email": "k@x.io" }
                    ]}))
                }),
            )
            .route(
                "/api/friends/{id}",
                delete(|| async { (StatusCode::FORBIDDEN, Json(json!({ "message": "nope" }))) }),
            )
    }

    fn ids(requests: &[FriendRequest]) -> Vec<&str> {
        requests.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn accept_and_decline_remove_requests() {
        let backend = MockBackend::start(routes()).await;
        let store = FriendRequestStore::new(FriendApi::new(ApiClient::new(&backend.base_url).unwrap()));
        store.load().await.unwrap();

        let accepted = store.accept("r1").await.unwrap();
        assert_eq!(accepted.sender.username, "bob");
        store.decline("r3").await.unwrap();
        assert_eq!(ids(&store.snapshot()), vec!["r2"]);
        assert!(store.accept("missing").await.is_err());
    }

    #[tokio::test]
    async fn failed_accept_restores_request_in_place() {
        let backend = MockBackend::start(routes()).await;
        let store = FriendRequestStore::new(FriendApi::new(ApiClient::new(&backend.base_url).unwrap()));
        store.load().await.unwrap();

        let err = store.accept("r2").await.unwrap_err();
        assert!(format!("{err:#}").contains("db down"));
        assert_eq!(ids(&store.snapshot()), vec!["r1", "r2", "r3"]);
    }

    #[tokio::test]
    async fn failed_unfriend_restores_friend() {
        let backend = MockBackend::start(routes()).await;
        let list = FriendList::new(FriendApi::new(ApiClient::new(&backend.base_url).unwrap()));
        list.load().await.unwrap();
        assert!(list.contains("u5"));

        assert!(list.unfriend("u2").await.is_err());
        let names: Vec<String> = list.snapshot().into_iter().map(|f| f.username).collect();
        assert_eq!(names, vec!["bob", "kim"]);
    }

    #[test]
    fn restore_clamps_to_current_length() {
        let mut items = vec![1, 2];
        restore(&mut items, 5, 3);
        assert_eq!(items, vec![1, 2, 3]);
        let taken = take_by_id(&mut items, "2", |_| "2");
        assert_eq!(taken, Some((0, 1)));
    }
}
