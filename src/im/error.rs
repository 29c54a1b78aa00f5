//! SDK 错误分类
//!
//! 网络错误、校验错误、鉴权错误、服务器错误分别对应不同的处理方式：
//! 鉴权失败由调用方跳转登录页，不弹提示；其余错误把 `message` 展示给用户。

use std::collections::BTreeMap;
use std::fmt;

/// 服务器未返回 message 字段时使用的兜底文案
pub const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error occurred";

/// API 层错误
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 请求没有到达服务器或连接中断
    #[error("网络错误: {0}")]
    Network(#[from] reqwest::Error),

    /// HTTP 401/403，会话无效
    #[error("未登录或会话已失效 (HTTP {status})")]
    Unauthorized { status: u16, message: String },

    /// 服务器返回的业务错误，`message` 取自响应体
    #[error("{message}")]
    Server { status: u16, message: String },

    /// 响应体无法解析为预期结构
    #[error("反序列化响应失败: {0}")]
    Decode(#[from] serde_json::Error),

    /// 响应中缺少 data 字段
    #[error("响应中缺少 data 字段: {0}")]
    MissingData(String),

    /// 客户端表单校验失败
    #[error("表单校验失败: {0}")]
    Validation(ValidationErrors),

    /// 实时通道尚未建立
    #[error("实时连接未建立")]
    NotConnected,

    #[error("无效的 URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// 是否需要跳转登录页
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    /// 面向用户展示的文案
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Server { message, .. } | ApiError::Unauthorized { message, .. } => {
                message.clone()
            }
            ApiError::Validation(errors) => errors.to_string(),
            other => other.to_string(),
        }
    }
}

/// 字段级校验错误（字段名 -> 提示文案），按字段名排序保证输出稳定
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同一字段只保留第一条错误
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 没有错误时返回 Ok，否则包装为 `ApiError::Validation`
    pub fn into_result(self) -> Result<(), ApiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|(field, msg)| format!("{field}: {msg}"))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}
