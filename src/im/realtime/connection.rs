//! 实时连接（Socket.IO over WebSocket）

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use reqwest::header::HeaderValue;
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::im::error::ApiError;
use crate::im::realtime::bus::EventBus;
use crate::im::realtime::codec::{decode, encode, OpenPayload, Packet};
use crate::im::realtime::events::{ClientEvent, ServerEvent};

/// WebSocket 写入端类型别名
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// WebSocket 读取端类型别名
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// 向实时通道发送事件的能力（连接本身和会话管理器都实现）
#[async_trait]
pub trait RealtimeSink: Send + Sync {
    async fn emit(&self, event: ClientEvent) -> Result<()>;
}

/// 根据后端地址构造 Socket.IO WebSocket 地址
pub fn realtime_url(base_url: &Url) -> Result<Url> {
    let mut url = base_url.clone();
    let scheme = match base_url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => bail!("不支持的协议: {other}"),
    };
    if url.set_scheme(scheme).is_err() {
        bail!("无法切换协议到 {scheme}");
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    let mut url = url.join("socket.io/").context("拼接 socket.io 路径失败")?;
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}

/// 一条已完成握手的实时连接
pub struct RealtimeConnection {
    sid: String,
    writer: Arc<Mutex<WsWriter>>,
    alive: Arc<watch::Sender<bool>>,
    bus: EventBus,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl RealtimeConnection {
    /// 建立连接：WebSocket 握手（携带会话 cookie）→ open 帧 → 命名空间连接确认
    pub async fn connect(
        base_url: &Url,
        cookie: Option<HeaderValue>,
        bus: EventBus,
        timeout: Duration,
    ) -> Result<Self> {
        let url = realtime_url(base_url)?;
        info!("[Realtime] 🔗 连接实时服务: {}", url);

        let mut request = url
            .as_str()
            .into_client_request()
            .context("构造 WebSocket 请求失败")?;
        if let Some(cookie) = cookie {
            request.headers_mut().insert(COOKIE, cookie);
        } else {
            debug!("[Realtime] 没有会话 cookie，以匿名身份连接");
        }

        let (ws_stream, response) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .context("WebSocket 连接超时")??;
        debug!("[Realtime] WebSocket 握手完成, 状态: {}", response.status());

        let (mut write, mut read) = ws_stream.split();

        let open = match tokio::time::timeout(timeout, next_packet(&mut read))
            .await
            .context("等待 open 帧超时")??
        {
            Packet::Open(open) => open,
            other => bail!("握手失败，期望 open 帧，收到: {other:?}"),
        };
        debug!(
            "[Realtime] Engine.IO 会话: sid={}, pingInterval={}ms, pingTimeout={}ms",
            open.sid, open.ping_interval, open.ping_timeout
        );

        write
            .send(WsMessage::Text(encode(&Packet::Connect(None))?))
            .await
            .context("发送命名空间连接请求失败")?;

        let sid = tokio::time::timeout(timeout, wait_connect_ack(&mut read, &mut write))
            .await
            .context("等待命名空间连接确认超时")??;
        info!("[Realtime] ✅ 实时连接已建立, sid={}", sid);

        let writer = Arc::new(Mutex::new(write));
        let (alive, _) = watch::channel(true);
        let alive = Arc::new(alive);
        let liveness = liveness_window(&open);

        bus.publish(ServerEvent::Connected { sid: sid.clone() });

        let reader = tokio::spawn(read_loop(
            read,
            writer.clone(),
            bus.clone(),
            liveness,
            alive.clone(),
        ));

        Ok(Self {
            sid,
            writer,
            alive,
            bus,
            reader: StdMutex::new(Some(reader)),
        })
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn is_connected(&self) -> bool {
        *self.alive.borrow()
    }

    /// 等待连接结束（服务器断开、心跳超时或主动关闭）
    pub async fn closed(&self) {
        let mut rx = self.alive.subscribe();
        let _ = rx.wait_for(|alive| !*alive).await;
    }

    /// 主动断开
    pub async fn close(&self) {
        if !self.is_connected() {
            return;
        }
        info!("[Realtime] 👋 主动断开实时连接, sid={}", self.sid);
        {
            let mut w = self.writer.lock().await;
            if let Ok(text) = encode(&Packet::Disconnect) {
                let _ = w.send(WsMessage::Text(text)).await;
            }
            let _ = w.close().await;
        }
        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
        self.alive.send_replace(false);
        self.bus.publish(ServerEvent::Disconnected {
            reason: "io client disconnect".to_string(),
        });
    }
}

#[async_trait]
impl RealtimeSink for RealtimeConnection {
    async fn emit(&self, event: ClientEvent) -> Result<()> {
        if !self.is_connected() {
            return Err(ApiError::NotConnected.into());
        }
        let text = encode(&event.to_packet()?)?;
        debug!("[Realtime] 📤 emit {}: {}", event.name(), text);
        let mut w = self.writer.lock().await;
        w.send(WsMessage::Text(text))
            .await
            .with_context(|| format!("发送 {} 失败", event.name()))?;
        Ok(())
    }
}

impl Drop for RealtimeConnection {
    fn drop(&mut self) {
        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
    }
}

/// 读取下一个 Socket.IO 帧（跳过 WebSocket 层的 ping/pong）
async fn next_packet(read: &mut WsReader) -> Result<Packet> {
    while let Some(msg) = read.next().await {
        match msg? {
            WsMessage::Text(text) => return decode(&text),
            WsMessage::Close(frame) => bail!("连接被关闭: {frame:?}"),
            WsMessage::Binary(_) => bail!("不支持二进制帧"),
            _ => {}
        }
    }
    bail!("连接已结束")
}

/// 等待命名空间连接确认，返回 Socket.IO sid
async fn wait_connect_ack(read: &mut WsReader, write: &mut WsWriter) -> Result<String> {
    loop {
        match next_packet(read).await? {
            Packet::Connect(payload) => {
                let sid = payload
                    .as_ref()
                    .and_then(|v| v.get("sid"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                return Ok(sid);
            }
            Packet::ConnectError(message) => bail!("服务器拒绝连接: {message}"),
            Packet::Ping => {
                write.send(WsMessage::Text(encode(&Packet::Pong)?)).await?;
            }
            other => debug!("[Realtime] 握手阶段忽略帧: {:?}", other),
        }
    }
}

/// 两次 ping 之间允许的最长静默
fn liveness_window(open: &OpenPayload) -> Duration {
    Duration::from_millis(open.ping_interval.saturating_add(open.ping_timeout))
}

/// 读循环：应答心跳、解析事件并发布到总线
async fn read_loop(
    mut read: WsReader,
    writer: Arc<Mutex<WsWriter>>,
    bus: EventBus,
    liveness: Duration,
    alive: Arc<watch::Sender<bool>>,
) {
    info!("[Realtime] 📥 开始监听服务器事件");
    let reason = loop {
        let next = match tokio::time::timeout(liveness, read.next()).await {
            Ok(next) => next,
            Err(_) => {
                warn!("[Realtime] ⏰ {:?} 内未收到心跳", liveness);
                break "ping timeout".to_string();
            }
        };
        match next {
            Some(Ok(WsMessage::Text(text))) => match decode(&text) {
                Ok(Packet::Ping) => {
                    let mut w = writer.lock().await;
                    let pong = match encode(&Packet::Pong) {
                        Ok(pong) => pong,
                        Err(e) => break format!("transport error: {e}"),
                    };
                    if let Err(e) = w.send(WsMessage::Text(pong)).await {
                        break format!("transport error: {e}");
                    }
                }
                Ok(Packet::Event { name, args }) => match ServerEvent::from_event(&name, args) {
                    Ok(event) => {
                        debug!("[Realtime] 📨 收到事件: {}", name);
                        bus.publish(event);
                    }
                    Err(e) => warn!("[Realtime] 事件 {} 解析失败: {:#}", name, e),
                },
                Ok(Packet::Disconnect) => break "io server disconnect".to_string(),
                Ok(Packet::Close) => break "transport close".to_string(),
                Ok(Packet::ConnectError(message)) => break format!("connect error: {message}"),
                Ok(other) => debug!("[Realtime] 忽略帧: {:?}", other),
                Err(e) => warn!("[Realtime] 帧解析失败: {:#}, 原始数据: {}", e, text),
            },
            Some(Ok(WsMessage::Close(frame))) => {
                warn!("[Realtime] 👋 连接关闭: {:?}", frame);
                break "transport close".to_string();
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!("[Realtime] WebSocket 错误: {}", e);
                break format!("transport error: {e}");
            }
            None => break "transport close".to_string(),
        }
    };

    warn!("[Realtime] 🔌 实时连接断开: {}", reason);
    alive.send_replace(false);
    bus.publish(ServerEvent::Disconnected { reason });
}
