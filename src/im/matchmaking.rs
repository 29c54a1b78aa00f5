//! 随机匹配：消耗代币，由服务器挑选对象并创建私聊

use anyhow::Result;
use serde_json::json;
use tracing::info;

use crate::im::api::ApiClient;
use crate::im::types::ChatRefData;

#[derive(Clone, Debug)]
pub struct MatchmakingApi {
    api: ApiClient,
}

impl MatchmakingApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// 发起匹配，返回新聊天的 ID
    ///
    /// 代币不足等情况由服务器拒绝，错误信息原样透传（例如 `Not enough tokens`）。
    pub async fn find_match(&self) -> Result<String> {
        info!("[Match] 🎲 发起匹配");
        let data: ChatRefData = self
            .api
            .post_json("/api/match/find", &json!({}))
            .await?
            .into_data("匹配")?;
        info!("[Match] ✅ 匹配成功，聊天 ID: {}", data.chat.id);
        Ok(data.chat.id)
    }
}
