use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::im::error::{ApiError, UNKNOWN_ERROR_MESSAGE};
use crate::im::serialization::deserialize_vec_or_null;

/// 统一的 API 响应包装结构体（`{ success, message, data }`）
///
/// 后端所有接口都用这个信封返回，data 字段可能为 null 或缺失。
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn empty() -> Self {
        Self {
            success: None,
            message: None,
            data: None,
        }
    }

    /// 取出 data，缺失时返回 `ApiError::MissingData`
    pub fn into_data(self, operation_name: &str) -> Result<T, ApiError> {
        self.data
            .ok_or_else(|| ApiError::MissingData(operation_name.to_string()))
    }
}

/// 错误响应体，只关心 message 字段
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// 从错误响应体中提取服务器文案
pub(crate) fn extract_error_message(body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.to_string())
}

/// 通用 HTTP 响应处理函数：非 2xx 归一化为 `ApiError`，2xx 反序列化为信封
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> Result<ApiResponse<T>, ApiError> {
    let status = response.status();

    // 读取 body bytes（只能读取一次）
    let body_bytes = response.bytes().await?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[Api] {} 响应 Body: {}", operation_name, body_str);

    if !status.is_success() {
        let message = extract_error_message(&body_bytes);
        error!(
            "[Api] {} 请求失败，HTTP状态: {}, 错误信息: {}",
            operation_name, status, message
        );
        let status = status.as_u16();
        return Err(if status == 401 || status == 403 {
            ApiError::Unauthorized { status, message }
        } else {
            ApiError::Server { status, message }
        });
    }

    if body_bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(ApiResponse::empty());
    }

    serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[Api] {} 反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        ApiError::Decode(e)
    })
}

// ========== 共享数据结构 ==========

/// 当前会话用户
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    /// 匹配功能消耗的代币余额
    #[serde(default)]
    pub tokens: i64,
    /// 好友 ID 列表
    #[serde(default, deserialize_with = "deserialize_vec_or_null")]
    pub friends: Vec<String>,
}

impl User {
    pub fn is_friend_of(&self, user_id: &str) -> bool {
        self.friends.iter().any(|id| id == user_id)
    }
}

/// 其他用户的简要信息（聊天对象、通知发送者、好友申请发送者）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// 聊天参与者
pub type Participant = UserRef;

/// 只带 ID 的聊天引用（`{ _id }`）
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRef {
    #[serde(rename = "_id")]
    pub id: String,
}

/// `data.chat` 包装
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRefData {
    pub chat: ChatRef,
}

/// `data.user` 包装
#[derive(Debug, Clone, Deserialize)]
pub struct UserData<U> {
    pub user: U,
}
