pub mod api;
pub mod auth;
pub mod chat;
pub mod client;
pub mod error;
pub mod forms;
pub mod friend;
pub mod matchmaking;
pub mod notification;
pub mod presence;
pub mod profile;
pub mod realtime;
pub mod serialization;
pub mod session;
pub mod types;

#[cfg(test)]
mod test_support;

// 重新导出认证相关类型
pub use auth::{AuthStore, GuardDecision, RouteGuard, SessionState};

// 重新导出会话连接相关类型
pub use session::{ReconnectPolicy, SessionManager};
