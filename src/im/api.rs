//! REST API 客户端
//!
//! 所有请求共用一个带 cookie jar 的 reqwest 客户端，登录后服务器下发的会话 cookie
//! 会自动附带在后续请求以及实时连接的握手上，不使用 token 请求头。

use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::im::error::ApiError;
use crate::im::types::{handle_http_response, ApiResponse};

/// 带凭据的 HTTP API 客户端，克隆开销很小（内部共享连接池和 cookie jar）
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    cookies: Arc<Jar>,
    base_url: Url,
}

impl ApiClient {
    /// 创建新的 API 客户端
    ///
    /// `base_url` 是后端根地址，例如 `https://connectsphere-hcim.onrender.com/`
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base_url = parse_base_url(base_url)?;
        let cookies = Arc::new(Jar::default());
        let client = reqwest::ClientBuilder::new()
            .cookie_provider(cookies.clone())
            .build()?;

        info!("[Api] 🌐 创建 API 客户端，后端地址: {}", base_url);
        Ok(Self {
            client,
            cookies,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// 拼接接口路径，避免出现双斜杠
    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidUrl(format!("{path}: {e}")))
    }

    /// 当前后端地址对应的 Cookie 请求头（实时连接握手时复用）
    pub fn cookie_header(&self) -> Option<HeaderValue> {
        self.cookies.cookies(&self.base_url)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<ApiResponse<T>, ApiError> {
        let url = self.url(path)?;
        debug!("[Api] 📡 GET {}", url);
        let response = self.client.get(url).send().await?;
        handle_http_response(response, &format!("GET {path}")).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, ApiError> {
        let url = self.url(path)?;
        debug!("[Api] 📡 POST {}", url);
        let response = self.client.post(url).json(body).send().await?;
        handle_http_response(response, &format!("POST {path}")).await
    }

    /// PUT 请求，body 为空时发送 `{}`
    pub async fn put_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<ApiResponse<T>, ApiError> {
        let url = self.url(path)?;
        debug!("[Api] 📡 PUT {}", url);
        let request = match body {
            Some(body) => self.client.put(url).json(body),
            None => self.client.put(url).json(&serde_json::json!({})),
        };
        let response = request.send().await?;
        handle_http_response(response, &format!("PUT {path}")).await
    }

    pub async fn delete_json<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<ApiResponse<T>, ApiError> {
        let url = self.url(path)?;
        debug!("[Api] 📡 DELETE {}", url);
        let response = self.client.delete(url).send().await?;
        handle_http_response(response, &format!("DELETE {path}")).await
    }
}

/// 解析后端根地址，保证以 `/` 结尾，这样 `join` 不会吞掉最后一段路径
fn parse_base_url(raw: &str) -> Result<Url, ApiError> {
    let mut normalized = raw.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    let url = Url::parse(&normalized).map_err(|e| ApiError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ApiError::InvalidUrl(format!("不支持的协议: {other}"))),
    }
}
