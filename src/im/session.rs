//! 会话级实时连接管理
//!
//! 一个已登录会话只持有一条实时连接。登录或会话校验成功后 `start`，登出时 `stop`。
//! 连接意外断开时由后台任务按退避策略重连，重连成功后为登记过的房间重新 joinRoom。

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::im::api::ApiClient;
use crate::im::error::ApiError;
use crate::im::realtime::bus::EventBus;
use crate::im::realtime::connection::{RealtimeConnection, RealtimeSink};
use crate::im::realtime::events::ClientEvent;

/// 重连退避：从 `initial` 开始每次翻倍，不超过 `max`，不限次数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

type Slot = Arc<RwLock<Option<Arc<RealtimeConnection>>>>;

pub struct SessionManager {
    api: ApiClient,
    bus: EventBus,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
    current: Slot,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        api: ApiClient,
        bus: EventBus,
        connect_timeout: Duration,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            api,
            bus,
            connect_timeout,
            policy,
            current: Arc::new(RwLock::new(None)),
            supervisor: Mutex::new(None),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// 是否有存活的连接
    pub fn is_connected(&self) -> bool {
        self.connection().is_some_and(|c| c.is_connected())
    }

    /// 是否已启动（包括正在重连）
    pub fn is_running(&self) -> bool {
        self.supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// 启动会话连接，已启动时直接返回
    ///
    /// 等待第一次连接的结果；首连失败会返回错误，但后台仍会按退避策略继续重试，
    /// 直到 `stop`。
    pub async fn start(&self) -> Result<()> {
        let first = {
            let mut supervisor = self.supervisor.lock().unwrap_or_else(PoisonError::into_inner);
            if supervisor.as_ref().is_some_and(|h| !h.is_finished()) {
                debug!("[Session] 实时连接已在运行");
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            *supervisor = Some(tokio::spawn(supervise(
                self.api.clone(),
                self.bus.clone(),
                self.current.clone(),
                self.connect_timeout,
                self.policy,
                tx,
            )));
            rx
        };
        info!("[Session] 🚀 会话实时连接启动");
        first
            .await
            .map_err(|_| anyhow!("会话连接任务提前退出"))?
    }

    /// 关闭会话连接并停止重连
    pub async fn stop(&self) {
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = supervisor {
            handle.abort();
        }
        let conn = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = conn {
            conn.close().await;
        }
        info!("[Session] 🛑 会话实时连接已停止");
    }

    fn connection(&self) -> Option<Arc<RealtimeConnection>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl RealtimeSink for SessionManager {
    async fn emit(&self, event: ClientEvent) -> Result<()> {
        match self.connection() {
            Some(conn) => conn.emit(event).await,
            None => Err(ApiError::NotConnected.into()),
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(handle) = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// 连接监督循环：连接 → 等待断开 → 退避 → 重连
async fn supervise(
    api: ApiClient,
    bus: EventBus,
    slot: Slot,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
    first: oneshot::Sender<Result<()>>,
) {
    let mut first = Some(first);
    let mut delay = policy.initial;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match RealtimeConnection::connect(
            api.base_url(),
            api.cookie_header(),
            bus.clone(),
            connect_timeout,
        )
        .await
        {
            Ok(conn) => {
                let conn = Arc::new(conn);
                *slot.write().unwrap_or_else(PoisonError::into_inner) = Some(conn.clone());
                delay = policy.initial;
                attempt = 0;

                for chat_id in bus.rooms().chat_ids() {
                    debug!("[Session] 🔁 重新加入房间 {}", chat_id);
                    if let Err(e) = conn.emit(ClientEvent::JoinRoom { chat_id }).await {
                        warn!("[Session] 重新加入房间失败: {:#}", e);
                    }
                }
                if let Some(tx) = first.take() {
                    let _ = tx.send(Ok(()));
                }

                conn.closed().await;
                {
                    let mut current = slot.write().unwrap_or_else(PoisonError::into_inner);
                    if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &conn)) {
                        *current = None;
                    }
                }
                warn!("[Session] 🔌 实时连接断开，{:?} 后重连", delay);
            }
            Err(e) => {
                warn!("[Session] ❌ 第 {} 次连接失败: {:#}，{:?} 后重试", attempt, e, delay);
                if let Some(tx) = first.take() {
                    let _ = tx.send(Err(e));
                }
            }
        }

        tokio::time::sleep(delay).await;
        delay = policy.next(delay);
    }
}
