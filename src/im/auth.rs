//! 登录态与路由守卫
//!
//! 会话凭据是服务器下发的 cookie，客户端只通过 `/api/auth/me` 判断是否登录。
//! 会话状态放在 `watch` 通道里，守卫和 UI 都订阅同一份状态。

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::im::api::ApiClient;
use crate::im::error::ApiError;
use crate::im::forms::{LoginForm, SignupForm};
use crate::im::types::{User, UserData};

/// 未登录时跳转的页面
pub const LOGIN_ROUTE: &str = "/login";

/// 不需要登录即可访问的页面
pub const PUBLIC_ROUTES: [&str; 3] = ["/login", "/register", "/"];

/// 认证相关接口
#[derive(Clone, Debug)]
pub struct AuthApi {
    api: ApiClient,
}

impl AuthApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// 当前登录用户
    pub async fn me(&self) -> Result<User> {
        let data: UserData<User> = self
            .api
            .get_json("/api/auth/me")
            .await?
            .into_data("会话校验")?;
        Ok(data.user)
    }

    pub async fn login(&self, form: &LoginForm) -> Result<()> {
        form.validate().into_result()?;
        info!("[Auth] 🔐 正在登录: {}", form.email);
        self.api
            .post_json::<Value, _>("/api/auth/login", &form.to_request())
            .await?;
        Ok(())
    }

    pub async fn register(&self, form: &SignupForm) -> Result<()> {
        form.validate().into_result()?;
        info!("[Auth] 📝 正在注册: {}", form.email);
        self.api
            .post_json::<Value, _>("/api/auth/register", &form.to_request())
            .await?;
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        self.api
            .post_json::<Value, _>("/api/auth/logout", &json!({}))
            .await
            .context("Failed to logout")?;
        Ok(())
    }
}

/// 会话状态
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// 会话校验进行中
    Loading,
    Authenticated(User),
    Anonymous,
}

impl SessionState {
    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }
}

/// 进程级登录态
pub struct AuthStore {
    api: AuthApi,
    state: watch::Sender<SessionState>,
}

impl AuthStore {
    pub fn new(api: AuthApi) -> Self {
        let (state, _) = watch::channel(SessionState::Loading);
        Self { api, state }
    }

    pub fn api(&self) -> &AuthApi {
        &self.api
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().user().cloned()
    }

    /// 会话校验：任何失败都视为未登录，不向调用方报错
    pub async fn check_session(&self) -> SessionState {
        let next = match self.api.me().await {
            Ok(user) => {
                info!("[Auth] ✅ 会话有效: {} ({})", user.username, user.id);
                SessionState::Authenticated(user)
            }
            Err(e) => {
                debug!("[Auth] 会话校验失败，视为未登录: {:#}", e);
                SessionState::Anonymous
            }
        };
        self.state.send_replace(next.clone());
        next
    }

    /// 登录后重新校验会话，返回当前用户
    pub async fn login(&self, form: &LoginForm) -> Result<User> {
        self.api.login(form).await?;
        match self.check_session().await {
            SessionState::Authenticated(user) => Ok(user),
            _ => Err(anyhow!("Unable to sign in. Please try again.")),
        }
    }

    /// 注册成功后不会自动登录
    pub async fn register(&self, form: &SignupForm) -> Result<()> {
        self.api.register(form).await
    }

    /// 登出：服务器确认后才清除本地状态
    pub async fn logout(&self) -> Result<()> {
        if let Err(e) = self.api.logout().await {
            warn!("[Auth] 登出失败: {:#}", e);
            return Err(e);
        }
        self.state.send_replace(SessionState::Anonymous);
        info!("[Auth] 👋 已登出");
        Ok(())
    }

    /// 用服务器返回的资料更新缓存的用户
    pub fn merge_user(&self, updated: &User) {
        self.state.send_if_modified(|state| match state {
            SessionState::Authenticated(user) if user.id == updated.id => {
                *user = updated.clone();
                true
            }
            _ => false,
        });
    }

    /// 未登录时返回 `Unauthorized`
    pub fn require_user(&self) -> Result<User, ApiError> {
        self.current_user().ok_or(ApiError::Unauthorized {
            status: 401,
            message: "Not authenticated".to_string(),
        })
    }
}

/// 守卫对某个页面的判断
#[derive(Debug, Clone, PartialEq)]
pub enum GuardDecision {
    /// 公开页面，直接渲染
    Public,
    /// 会话校验未完成，显示占位
    Loading,
    Render(User),
    Redirect(&'static str),
}

pub struct RouteGuard {
    state: watch::Receiver<SessionState>,
}

impl RouteGuard {
    pub fn new(store: &AuthStore) -> Self {
        Self {
            state: store.subscribe(),
        }
    }

    pub fn is_public(path: &str) -> bool {
        PUBLIC_ROUTES.contains(&path)
    }

    pub fn decide(&self, path: &str) -> GuardDecision {
        if Self::is_public(path) {
            return GuardDecision::Public;
        }
        match &*self.state.borrow() {
            SessionState::Loading => GuardDecision::Loading,
            SessionState::Authenticated(user) => GuardDecision::Render(user.clone()),
            SessionState::Anonymous => GuardDecision::Redirect(LOGIN_ROUTE),
        }
    }

    /// 等待会话校验结束后给出判断
    pub async fn wait_resolved(&mut self, path: &str) -> GuardDecision {
        if !Self::is_public(path) {
            let _ = self
                .state
                .wait_for(|state| *state != SessionState::Loading)
                .await;
        }
        self.decide(path)
    }
}
