//! ConnectSphere 客户端
//!
//! 把 REST 客户端、会话连接和各个 store 组装在一起。一个进程通常只持有一个客户端：
//! `init` 做一次会话校验，已登录时建立实时连接并加载在线状态和通知；
//! `logout` 成功后关闭连接并清空所有本地状态。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::im::api::ApiClient;
use crate::im::auth::{AuthApi, AuthStore, RouteGuard, SessionState};
use crate::im::chat::{ChatApi, ChatContext, ChatRoom, ChatRoomListener, EmptyChatRoomListener};
use crate::im::forms::{LoginForm, SignupForm};
use crate::im::friend::{FriendApi, FriendList, FriendListener, FriendRequestStore};
use crate::im::matchmaking::MatchmakingApi;
use crate::im::notification::push::{enable_push, PushPlatform, PushStatus};
use crate::im::notification::{
    EmptyNotificationListener, NotificationApi, NotificationCenter, NotificationListener,
    SilentSoundCue, SoundCue,
};
use crate::im::presence::{EmptyPresenceListener, OnlineStatusStore, PresenceListener};
use crate::im::profile::{Profile, ProfileApi, ProfileUpdate};
use crate::im::realtime::bus::EventBus;
use crate::im::session::{ReconnectPolicy, SessionManager};
use crate::im::types::User;

/// 默认后端地址
pub const DEFAULT_API_BASE_URL: &str = "https://connectsphere-hcim.onrender.com/";

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// HTTP API 基础地址，实时连接使用同一个主机
    pub api_base_url: String,
    /// Web Push 的 VAPID 公钥
    pub vapid_public_key: Option<String>,
    /// 打开通知面板后多久标记已读
    pub mark_read_delay: Duration,
    /// 聊天消息实时发送后是否再通过 REST 补发
    pub rest_fallback: bool,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    /// 创建默认配置
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            vapid_public_key: None,
            mark_read_delay: Duration::from_millis(1500),
            rest_fallback: true,
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// 从环境变量读取：`CONNECTSPHERE_API_BASE_URL`、`CONNECTSPHERE_VAPID_PUBLIC_KEY`
    pub fn from_env() -> Self {
        let base = std::env::var("CONNECTSPHERE_API_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let mut config = Self::new(base);
        config.vapid_public_key = std::env::var("CONNECTSPHERE_VAPID_PUBLIC_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty());
        config
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE_URL)
    }
}

/// ConnectSphere 客户端
pub struct ConnectSphereClient {
    config: ClientConfig,
    api: ApiClient,
    bus: EventBus,
    auth: Arc<AuthStore>,
    session: Arc<SessionManager>,
    presence: Arc<OnlineStatusStore>,
    notifications: Arc<NotificationCenter>,
    friends: Arc<FriendList>,
    friend_requests: Arc<FriendRequestStore>,
    chat_api: ChatApi,
    friend_api: FriendApi,
    notification_api: NotificationApi,
    profile_api: ProfileApi,
    matchmaking: MatchmakingApi,
    sound: Arc<dyn SoundCue>,
    notification_listener: Arc<dyn NotificationListener>,
}

impl ConnectSphereClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api = ApiClient::new(&config.api_base_url).context("创建 API 客户端失败")?;
        let bus = EventBus::new();
        let session = Arc::new(SessionManager::new(
            api.clone(),
            bus.clone(),
            config.connect_timeout,
            config.reconnect,
        ));
        let friend_api = FriendApi::new(api.clone());
        let notification_api = NotificationApi::new(api.clone());
        let sound: Arc<dyn SoundCue> = Arc::new(SilentSoundCue);
        let notification_listener: Arc<dyn NotificationListener> =
            Arc::new(EmptyNotificationListener);

        Ok(Self {
            auth: Arc::new(AuthStore::new(AuthApi::new(api.clone()))),
            presence: Arc::new(OnlineStatusStore::with_listener(
                api.clone(),
                Arc::new(EmptyPresenceListener),
            )),
            notifications: Arc::new(NotificationCenter::with_listener(
                notification_api.clone(),
                config.mark_read_delay,
                notification_listener.clone(),
                sound.clone(),
            )),
            friends: Arc::new(FriendList::new(friend_api.clone())),
            friend_requests: Arc::new(FriendRequestStore::new(friend_api.clone())),
            chat_api: ChatApi::new(api.clone()),
            profile_api: ProfileApi::new(api.clone()),
            matchmaking: MatchmakingApi::new(api.clone()),
            friend_api,
            notification_api,
            session,
            bus,
            api,
            config,
            sound,
            notification_listener,
        })
    }

    /// 注册在线状态监听器（需在 `init` / `login` 之前调用）
    pub fn set_presence_listener(&mut self, listener: Arc<dyn PresenceListener>) {
        self.presence.detach();
        self.presence = Arc::new(OnlineStatusStore::with_listener(self.api.clone(), listener));
    }

    /// 注册通知监听器
    pub fn set_notification_listener(&mut self, listener: Arc<dyn NotificationListener>) {
        self.notification_listener = listener;
        self.rebuild_notification_center();
    }

    /// 设置新通知提示音
    pub fn set_sound_cue(&mut self, sound: Arc<dyn SoundCue>) {
        self.sound = sound;
        self.rebuild_notification_center();
    }

    /// 注册好友监听器（好友列表和好友申请共用）
    pub fn set_friend_listener(&mut self, listener: Arc<dyn FriendListener>) {
        self.friends = Arc::new(FriendList::with_listener(
            self.friend_api.clone(),
            listener.clone(),
        ));
        self.friend_requests = Arc::new(FriendRequestStore::with_listener(
            self.friend_api.clone(),
            listener,
        ));
    }

    fn rebuild_notification_center(&mut self) {
        self.notifications.detach();
        self.notifications = Arc::new(NotificationCenter::with_listener(
            self.notification_api.clone(),
            self.config.mark_read_delay,
            self.notification_listener.clone(),
            self.sound.clone(),
        ));
    }

    /// 启动时的会话校验
    pub async fn init(&self) -> SessionState {
        let state = self.auth.check_session().await;
        if let SessionState::Authenticated(user) = &state {
            info!("[Client] 👤 已登录用户: {}", user.username);
            self.start_session().await;
        } else {
            info!("[Client] 未登录");
        }
        state
    }

    pub async fn login(&self, form: &LoginForm) -> Result<User> {
        let user = self.auth.login(form).await?;
        self.start_session().await;
        Ok(user)
    }

    pub async fn register(&self, form: &SignupForm) -> Result<()> {
        self.auth.register(form).await
    }

    /// 登出：服务器确认后关闭实时连接并清空本地状态
    pub async fn logout(&self) -> Result<()> {
        self.auth.logout().await?;
        self.session.stop().await;
        self.presence.detach();
        self.presence.clear();
        self.notifications.detach();
        self.notifications.clear();
        self.friends.clear();
        self.friend_requests.clear();
        Ok(())
    }

    /// 建立会话连接并加载会话级数据，单项失败只记录日志
    async fn start_session(&self) {
        self.presence.attach(&self.bus);
        self.notifications.attach(&self.bus);

        if let Err(e) = self.session.start().await {
            warn!("[Client] 实时连接建立失败，后台继续重试: {:#}", e);
        }
        let (presence, notifications) =
            tokio::join!(self.presence.load(), self.notifications.load());
        if let Err(e) = presence {
            warn!("[Client] 加载在线用户失败: {:#}", e);
        }
        if let Err(e) = notifications {
            warn!("[Client] Failed to fetch notifications: {:#}", e);
        }
    }

    pub fn route_guard(&self) -> RouteGuard {
        RouteGuard::new(&self.auth)
    }

    pub fn current_user(&self) -> Option<User> {
        self.auth.current_user()
    }

    fn chat_context(&self) -> ChatContext {
        ChatContext {
            api: self.chat_api.clone(),
            friends: self.friend_api.clone(),
            sink: self.session.clone(),
            bus: self.bus.clone(),
            rest_fallback: self.config.rest_fallback,
        }
    }

    /// 打开聊天室
    pub async fn open_chat(&self, chat_id: &str) -> Result<Arc<ChatRoom>> {
        self.open_chat_with_listener(chat_id, Arc::new(EmptyChatRoomListener))
            .await
    }

    pub async fn open_chat_with_listener(
        &self,
        chat_id: &str,
        listener: Arc<dyn ChatRoomListener>,
    ) -> Result<Arc<ChatRoom>> {
        let me = self.auth.require_user()?;
        let room = ChatRoom::with_listener(chat_id, me, self.chat_context(), listener);
        room.open().await?;
        Ok(room)
    }

    /// 与好友的私聊（不存在时由服务器创建）
    pub async fn start_chat_with(&self, friend_id: &str) -> Result<Arc<ChatRoom>> {
        let chat_id = self
            .chat_api
            .chat_with(friend_id)
            .await
            .context("Could not start chat. Please try again.")?;
        self.open_chat(&chat_id).await
    }

    /// 随机匹配，成功后打开新聊天
    pub async fn find_match(&self) -> Result<Arc<ChatRoom>> {
        self.auth.require_user()?;
        let chat_id = self.matchmaking.find_match().await?;
        self.open_chat(&chat_id).await
    }

    /// 更新自己的资料，并同步到缓存的用户
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile> {
        let profile = self.profile_api.update(update).await?;
        if let Some(mut user) = self.auth.current_user() {
            // 响应里没有 email 和 tokens，这两项保留缓存值
            user.username = profile.username.clone();
            user.friends = profile.friends.clone();
            self.auth.merge_user(&user);
        }
        Ok(profile)
    }

    /// 开启系统推送
    pub async fn enable_push(&self, platform: &dyn PushPlatform) -> Result<PushStatus> {
        enable_push(
            &self.notification_api,
            platform,
            self.config.vapid_public_key.as_deref(),
        )
        .await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn auth(&self) -> &Arc<AuthStore> {
        &self.auth
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn presence(&self) -> &Arc<OnlineStatusStore> {
        &self.presence
    }

    pub fn notifications(&self) -> &Arc<NotificationCenter> {
        &self.notifications
    }

    pub fn friends(&self) -> &Arc<FriendList> {
        &self.friends
    }

    pub fn friend_requests(&self) -> &Arc<FriendRequestStore> {
        &self.friend_requests
    }

    pub fn profiles(&self) -> &ProfileApi {
        &self.profile_api
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::test_support::{MockBackend, MockSocket};
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn logged_in(headers: &HeaderMap) -> bool {
        headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("token=abc"))
    }

    fn backend_routes() -> Router {
        Router::new()
            .route(
                "/api/auth/me",
                get(|headers: HeaderMap| async move {
                    if logged_in(&headers) {
                        Json(json!({ "success": true, "data": { "user": {
                            "_id": "u1", "username": "alice", "email": "a@x.io", "tokens": 5, "friends": []
                        }}}))
                        .into_response()
                    } else {
                        (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Not authorized" }))).into_response()
                    }
                }),
            )
            .route(
                "/api/auth/login",
                post(|| async {
                    (
                        [(header::SET_COOKIE, "token=abc; Path=/; HttpOnly")],
                        Json(json!({ "success": true })),
                    )
                }),
            )
            .route(
                "/api/auth/logout",
                post(|| async { Json(json!({ "success": true })) }),
            )
            .route(
                "/api/users/online",
                get(|| async { Json(json!({ "success": true, "data": { "onlineUserIds": ["u2"] } })) }),
            )
            .route(
                "/api/notifications",
                get(|| async { Json(json!({ "success": true, "data": [] })) }),
            )
            .route(
                "/api/chats/with/{friend_id}",
                get(|| async { Json(json!({ "success": true, "data": { "chat": { "_id": "c7" } } })) }),
            )
            .route(
                "/api/chats/c7/messages",
                get(|| async { Json(json!({ "success": true, "data": { "messages": [] } })) }),
            )
            .route(
                "/api/chats/c7",
                get(|| async { Json(json!({ "success": true, "data": { "chat": { "participants": [
                    { "_id": "u1", "username": "alice" }, { "_id": "u2", "username": "bob" }
                ]}}})) }),
            )
    }

    #[test]
    fn config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.mark_read_delay, Duration::from_millis(1500));
        assert_eq!(config.reconnect.max, Duration::from_secs(5));
        assert!(config.rest_fallback);
    }

    #[tokio::test]
    async fn anonymous_init_opens_no_connection() {
        let socket = MockSocket::new();
        let backend = MockBackend::start(socket.mount(backend_routes())).await;
        let client = ConnectSphereClient::new(ClientConfig::new(&backend.base_url)).unwrap();

        assert_eq!(client.init().await, SessionState::Anonymous);
        assert!(!client.session().is_running());
        assert_eq!(socket.handshakes(), 0);
        assert!(client.open_chat("c7").await.is_err());
    }

    #[tokio::test]
    async fn login_session_chat_and_logout() {
        let socket = MockSocket::new();
        let backend = MockBackend::start(socket.mount(backend_routes())).await;
        let mut config = ClientConfig::new(&backend.base_url);
        config.rest_fallback = false;
        let client = ConnectSphereClient::new(config).unwrap();

        let user = client
            .login(&LoginForm::new("a@x.io", "secret"))
            .await
            .unwrap();
        assert_eq!(user.tokens, 5);
        assert!(client.session().is_connected());
        assert_eq!(socket.handshakes(), 1);
        assert!(client.presence().is_online("u2"));

        // 服务器推送经同一条连接到达各个 store
        socket.push_event("userOnline", json!({ "userId": "u9" }));
        socket.push_event(
            "newNotification",
            json!({ "_id": "n1", "sender": { "_id": "u2", "username": "bob" },
                    "type": "FRIEND_REQUEST", "isRead": false,
                    "createdAt": "2024-05-01T10:00:00Z" }),
        );
        tokio::time::timeout(Duration::from_secs(5), async {
            while !client.presence().is_online("u9") || client.notifications().unread_count() == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        // 重复登录不会建立第二条连接
        client.login(&LoginForm::new("a@x.io", "secret")).await.unwrap();
        assert_eq!(socket.handshakes(), 1);

        let room = client.start_chat_with("u2").await.unwrap();
        assert_eq!(room.chat_id(), "c7");
        assert_eq!(room.partner().unwrap().username, "bob");
        room.send_text("hey bob").await.unwrap();
        assert_eq!(room.messages().len(), 1);

        client.logout().await.unwrap();
        assert!(!client.session().is_connected());
        assert!(client.current_user().is_none());
        assert!(client.presence().snapshot().is_empty());
        assert!(room.send_text("after logout").await.is_err());
    }
    #[tokio::test]
    async fn profile_update_syncs_cached_user() {
        let calls = Arc::new(AtomicUsize::new(0));
        let routes = backend_routes().route(
            "/api/profile/me",
            put(move || {
                let calls = calls.clone();
                async move {
                    // 第一次返回一个好友，第二次好友列表为空
                    let friends = if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        json!(["u2"])
                    } else {
                        json!([])
                    };
                    Json(json!({ "success": true, "data": { "user": {
                        "_id": "u1", "username": "alice_b", "friends": friends
                    }}}))
                }
            }),
        );
        let socket = MockSocket::new();
        let backend = MockBackend::start(socket.mount(routes)).await;
        let client = ConnectSphereClient::new(ClientConfig::new(&backend.base_url)).unwrap();
        client.login(&LoginForm::new("a@x.io", "secret")).await.unwrap();

        client.update_profile(&ProfileUpdate::default()).await.unwrap();
        let user = client.current_user().unwrap();
        assert_eq!(user.username, "alice_b");
        assert_eq!(user.friends, vec!["u2"]);
        assert_eq!(user.email, "a@x.io");
        assert_eq!(user.tokens, 5);

        client.update_profile(&ProfileUpdate::default()).await.unwrap();
        assert!(client.current_user().unwrap().friends.is_empty());

        client.logout().await.unwrap();
    }
}
