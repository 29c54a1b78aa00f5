pub mod im;

// 重新导出常用类型，方便外部使用
pub use im::{
    chat::{ChatMessage, ChatRoom},
    client::{ClientConfig, ConnectSphereClient},
    error::ApiError,
    forms::{LoginForm, SignupForm},
    notification::Notification,
    types::User,
    SessionState,
};
